//! Per-record enrichment: page metadata plus WHOIS expiry.
//!
//! [`EnrichmentWorker`] is the one enrichment core shared by the in-process
//! pipeline and the queue worker. It never fails: a failed page fetch or
//! WHOIS lookup leaves its fields empty and marks the result degraded.

use std::sync::Arc;

use async_trait::async_trait;
use namex_fetcher::PageFetcher;
use namex_shared::{AppConfig, DomainRecord, EnrichmentResult, FetchConfig, Result, WhoisConfig};
use namex_whois::{TldRegistry, WhoisResolver};
use tracing::{debug, instrument, warn};

/// Turns a [`DomainRecord`] into an [`EnrichmentResult`].
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Total: sub-step failures are folded into the result's status.
    async fn enrich(&self, record: &DomainRecord) -> EnrichmentResult;
}

/// Fetches the root page and resolves WHOIS concurrently.
#[derive(Debug, Clone)]
pub struct EnrichmentWorker {
    fetcher: PageFetcher,
    whois: WhoisResolver,
}

impl EnrichmentWorker {
    pub fn new(fetcher: PageFetcher, whois: WhoisResolver) -> Self {
        Self { fetcher, whois }
    }

    /// Build the fetcher, the shared TLD registry, and the resolver from config.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let whois_config = WhoisConfig::from(config);
        let registry = Arc::new(TldRegistry::with_overrides(&whois_config.servers));
        let fetcher = PageFetcher::new(&FetchConfig::from(config))?;

        debug!(zones = registry.len(), "tld registry ready");

        Ok(Self::new(fetcher, WhoisResolver::new(registry, &whois_config)))
    }
}

#[async_trait]
impl Enricher for EnrichmentWorker {
    #[instrument(skip_all, fields(id = record.id, domain = %record.domain))]
    async fn enrich(&self, record: &DomainRecord) -> EnrichmentResult {
        let (page, expiry) = tokio::join!(
            self.fetcher.fetch(&record.domain),
            self.whois.resolve(&record.domain),
        );

        let mut result = EnrichmentResult::empty(record.id);
        result.title = page.meta.title;
        result.description = page.meta.description;
        result.og_title = page.meta.og_title;
        result.og_description = page.meta.og_description;
        result.keywords = page.meta.keywords;

        if let Some(e) = page.error {
            warn!(error = %e, "page step degraded");
            result.degrade(format!("page: {}", e.kind()));
        }

        match expiry {
            Ok(expiry) => result.expiry_date = expiry,
            Err(e) => {
                warn!(error = %e, "whois step degraded");
                result.degrade(format!("whois: {}", e.kind()));
            }
        }

        debug!(
            degraded = result.status.is_degraded(),
            expiry = result.expiry_date.as_deref().unwrap_or(""),
            "record enriched"
        );
        result
    }
}
