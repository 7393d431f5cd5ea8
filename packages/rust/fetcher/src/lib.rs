//! HTTP page fetching for domain enrichment.
//!
//! [`PageFetcher::fetch`] requests a domain's root page (plain HTTP first,
//! then HTTPS if the connection fails) and extracts its metadata with
//! [`parser::parse_page`]. Every outcome is reported in a [`PageFetch`];
//! fetching never fails the caller.

pub mod parser;

use namex_shared::{FetchConfig, NamexError, Result};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};

pub use parser::{PageMeta, parse_page};

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("namex/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// PageFetch
// ---------------------------------------------------------------------------

/// Outcome of fetching one domain's root page.
#[derive(Debug, Default)]
pub struct PageFetch {
    /// URL that produced the response, if any attempt connected.
    pub url: Option<String>,
    /// `true` only for an HTTP 200 answer.
    pub status_ok: bool,
    pub status_code: Option<u16>,
    /// Fields parsed from the body. Filled for non-200 answers too.
    pub meta: PageMeta,
    /// Why the fetch is not `status_ok`.
    pub error: Option<NamexError>,
}

impl PageFetch {
    fn failed(error: NamexError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// PageFetcher
// ---------------------------------------------------------------------------

/// HTTP client wrapper for root-page fetches. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    /// Build a fetcher with the configured connect and total timeouts.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|e| NamexError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Fetch `http://{domain}/`, falling back to `https://{domain}/` when the
    /// first request fails before any response arrives.
    #[instrument(skip_all, fields(domain = %domain))]
    pub async fn fetch(&self, domain: &str) -> PageFetch {
        let http_url = format!("http://{domain}/");
        let first = match self.fetch_url(&http_url).await {
            Ok(page) => return page,
            Err(e) => e,
        };

        debug!(error = %first, "plain HTTP failed, retrying over HTTPS");

        let https_url = format!("https://{domain}/");
        match self.fetch_url(&https_url).await {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "page fetch failed");
                PageFetch::failed(e)
            }
        }
    }

    /// Request a single URL.
    ///
    /// Transport errors are returned as `Err`; any HTTP answer, including
    /// non-200, becomes an `Ok` [`PageFetch`].
    pub async fn fetch_url(&self, url: &str) -> Result<PageFetch> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NamexError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        let final_url = response.url().to_string();

        let mut page = PageFetch {
            url: Some(final_url.clone()),
            status_ok: status == StatusCode::OK,
            status_code: Some(status.as_u16()),
            ..Default::default()
        };

        if !page.status_ok {
            debug!(url = %final_url, status = status.as_u16(), "non-200 response");
            page.error = Some(NamexError::HttpStatus {
                url: final_url.clone(),
                status: status.as_u16(),
            });
        }

        match response.text().await {
            Ok(body) => page.meta = parse_page(&body),
            Err(e) => {
                page.status_ok = false;
                page.error = Some(NamexError::Network(format!(
                    "{final_url}: body read failed: {e}"
                )));
            }
        }

        Ok(page)
    }
}
