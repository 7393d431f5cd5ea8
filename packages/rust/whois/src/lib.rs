//! Raw WHOIS (RFC 3912) lookups over TCP port 43.
//!
//! [`WhoisResolver::resolve`] maps a domain to its registry expiry date:
//! normalize the name, pick the zone's server from the shared
//! [`TldRegistry`], send `domain\r\n`, read until the server closes the
//! connection, and scan the response for `Registry Expiry Date:`.

pub mod parser;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use namex_shared::{NamexError, Result, WhoisConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument, warn};

pub use parser::extract_expiry;
pub use registry::TldRegistry;

/// Standard WHOIS port.
pub const WHOIS_PORT: u16 = 43;

/// Fixed TCP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Responses are truncated beyond this size (1 MiB).
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// WhoisResolver
// ---------------------------------------------------------------------------

/// Resolves domains to registry expiry dates.
///
/// Cheap to clone; the registry is shared by reference.
#[derive(Debug, Clone)]
pub struct WhoisResolver {
    registry: Arc<TldRegistry>,
    port: u16,
    read_timeout: Duration,
}

impl WhoisResolver {
    pub fn new(registry: Arc<TldRegistry>, config: &WhoisConfig) -> Self {
        Self {
            registry,
            port: WHOIS_PORT,
            read_timeout: config.read_timeout,
        }
    }

    /// Connect to `port` instead of 43 (local stand-in servers).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn registry(&self) -> &TldRegistry {
        &self.registry
    }

    /// Normalize `domain` and find its WHOIS server. Performs no I/O.
    ///
    /// Returns the normalized domain together with the server hostname.
    pub fn server_for<'a>(&'a self, domain: &str) -> Result<(String, &'a str)> {
        let domain = normalize_domain(domain)?;
        let zone = domain.rsplit('.').next().unwrap_or_default();
        let server = self
            .registry
            .lookup(zone)
            .ok_or_else(|| NamexError::UnknownZone {
                zone: zone.to_string(),
                domain: domain.clone(),
            })?;
        Ok((domain, server))
    }

    /// Send one WHOIS query and return the raw response text.
    #[instrument(skip_all, fields(domain = %domain))]
    pub async fn query(&self, domain: &str) -> Result<String> {
        let (domain, server) = self.server_for(domain)?;
        let addr = format!("{server}:{}", self.port);

        debug!(%addr, "querying whois server");

        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| NamexError::ConnectTimeout {
                server: addr.clone(),
            })?
            .map_err(|source| NamexError::Connect {
                server: addr.clone(),
                source,
            })?;

        stream
            .write_all(format!("{domain}\r\n").as_bytes())
            .await
            .map_err(|e| NamexError::Network(format!("{addr}: write failed: {e}")))?;

        let mut buf = Vec::new();
        tokio::time::timeout(
            self.read_timeout,
            (&mut stream)
                .take(MAX_RESPONSE_BYTES + 1)
                .read_to_end(&mut buf),
        )
        .await
        .map_err(|_| {
            NamexError::Network(format!(
                "{addr}: no complete response within {}s",
                self.read_timeout.as_secs()
            ))
        })?
        .map_err(|e| NamexError::Network(format!("{addr}: read failed: {e}")))?;

        if buf.len() as u64 > MAX_RESPONSE_BYTES {
            warn!(%addr, limit = MAX_RESPONSE_BYTES, "whois response truncated");
            buf.truncate(MAX_RESPONSE_BYTES as usize);
        }

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Look up the registry expiry date of `domain`.
    ///
    /// `Ok(None)` means the server answered without an expiry field.
    pub async fn resolve(&self, domain: &str) -> Result<Option<String>> {
        let response = self.query(domain).await?;
        Ok(extract_expiry(&response))
    }
}

/// Trim, lowercase, and drop one trailing root dot. Requires at least two
/// non-empty labels.
pub fn normalize_domain(domain: &str) -> Result<String> {
    let trimmed = domain.trim().to_ascii_lowercase();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(&trimmed);

    let labels: Vec<&str> = trimmed.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return Err(NamexError::InvalidDomain {
            domain: domain.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const EXAMPLE_RESPONSE: &str = "   Domain Name: EXAMPLE.COM\r\n\
   Registry Domain ID: 2336799_DOMAIN_COM-VRSN\r\n\
   Registry Expiry Date: 2025-08-13T04:00:00Z\r\n\
   Registrar: RESERVED-Internet Assigned Numbers Authority\r\n";

    /// One-shot WHOIS stand-in: records the query line, writes `response`, closes.
    async fn spawn_whois_server(response: &'static str) -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let mut socket = reader.into_inner();
            socket.write_all(response.as_bytes()).await.unwrap();
            line
        });
        (port, handle)
    }

    fn local_resolver(port: u16) -> WhoisResolver {
        let registry = TldRegistry::from_entries([("com", "127.0.0.1"), ("org", "127.0.0.1")]);
        WhoisResolver::new(Arc::new(registry), &WhoisConfig::default()).with_port(port)
    }

    /// Asserts nobody connects to `listener` within a short window.
    async fn assert_no_connection(listener: TcpListener) {
        let accepted =
            tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accepted.is_err(), "resolver opened a connection");
    }

    #[test]
    fn normalize_domain_rules() {
        assert_eq!(normalize_domain(" Example.COM. ").unwrap(), "example.com");
        assert_eq!(normalize_domain("a.b.co").unwrap(), "a.b.co");
        for bad in ["localhost", "", ".", "bad..tld", ".com", "example.com.."] {
            assert!(
                matches!(normalize_domain(bad), Err(NamexError::InvalidDomain { .. })),
                "{bad:?} should be invalid"
            );
        }
    }

    #[test]
    fn server_for_known_and_unknown_zones() {
        let resolver = WhoisResolver::new(Arc::new(TldRegistry::builtin()), &WhoisConfig::default());
        let (domain, server) = resolver.server_for("WWW.Example.Org").unwrap();
        assert_eq!(domain, "www.example.org");
        assert_eq!(server, "whois.pir.org");

        let err = resolver.server_for("example.zz").unwrap_err();
        assert!(matches!(err, NamexError::UnknownZone { ref zone, .. } if zone == "zz"));
    }

    #[tokio::test]
    async fn single_label_domain_does_no_io() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let resolver = local_resolver(listener.local_addr().unwrap().port());

        let err = resolver.resolve("localhost").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_domain");
        assert_no_connection(listener).await;
    }

    #[tokio::test]
    async fn unknown_zone_does_no_io() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let resolver = local_resolver(listener.local_addr().unwrap().port());

        let err = resolver.resolve("example.zz").await.unwrap_err();
        assert_eq!(err.kind(), "unknown_zone");
        assert_no_connection(listener).await;
    }

    #[tokio::test]
    async fn resolve_reads_expiry_from_server() {
        let (port, server) = spawn_whois_server(EXAMPLE_RESPONSE).await;
        let resolver = local_resolver(port);

        let expiry = resolver.resolve("Example.com.").await.unwrap();
        assert_eq!(expiry.as_deref(), Some("2025-08-13 04:00:00"));
        assert_eq!(server.await.unwrap(), "example.com\r\n");
    }

    #[tokio::test]
    async fn resolve_without_expiry_is_none() {
        let (port, _server) = spawn_whois_server("Domain Name: EXAMPLE.ORG\r\n").await;
        let resolver = local_resolver(port);

        assert_eq!(resolver.resolve("example.org").await.unwrap(), None);
    }

    #[tokio::test]
    async fn query_returns_raw_text() {
        let (port, _server) = spawn_whois_server(EXAMPLE_RESPONSE).await;
        let raw = local_resolver(port).query("example.com").await.unwrap();
        assert!(raw.contains("Registry Domain ID: 2336799_DOMAIN_COM-VRSN"));
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = local_resolver(port).resolve("example.com").await.unwrap_err();
        assert_eq!(err.kind(), "connect");
    }

    #[tokio::test]
    async fn silent_server_hits_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let registry = TldRegistry::from_entries([("com", "127.0.0.1")]);
        let config = WhoisConfig {
            read_timeout: Duration::from_millis(200),
            ..WhoisConfig::default()
        };
        let resolver = WhoisResolver::new(Arc::new(registry), &config).with_port(port);

        let err = resolver.resolve("example.com").await.unwrap_err();
        assert_eq!(err.kind(), "network");
    }
}
