//! Shared fixtures for the core test modules.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use namex_fetcher::PageFetcher;
use namex_shared::{DomainRecord, EnrichmentResult, FetchConfig, NamexError, Result, WhoisConfig};
use namex_storage::Storage;
use namex_whois::{TldRegistry, WhoisResolver};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::enrichment::{Enricher, EnrichmentWorker};
use crate::sink::ResultSink;

/// Temp-file database, unique per call.
pub(crate) async fn test_storage() -> Arc<Storage> {
    let tmp = std::env::temp_dir().join(format!("namex_core_test_{}.db", Uuid::now_v7()));
    Arc::new(Storage::open(&tmp).await.expect("open test db"))
}

/// Store seeded with `domains`, returned with their ids in order.
pub(crate) async fn seeded_storage(domains: &[&str]) -> (Arc<Storage>, Vec<i64>) {
    let storage = test_storage().await;
    let mut ids = Vec::new();
    for domain in domains {
        let id = storage
            .insert_domain(domain)
            .await
            .expect("insert")
            .expect("fresh domain");
        ids.push(id);
    }
    (storage, ids)
}

/// WHOIS stand-in answering every connection with `response`.
pub(crate) async fn spawn_whois_server(response: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                let mut line = String::new();
                let _ = reader.read_line(&mut line).await;
                let mut socket = reader.into_inner();
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
    port
}

/// Real worker whose `com`/`org` WHOIS server is 127.0.0.1:`whois_port`.
pub(crate) fn local_worker(whois_port: u16) -> EnrichmentWorker {
    let registry = TldRegistry::from_entries([("com", "127.0.0.1"), ("org", "127.0.0.1")]);
    let whois = WhoisResolver::new(
        Arc::new(registry),
        &WhoisConfig {
            read_timeout: Duration::from_secs(2),
            ..WhoisConfig::default()
        },
    )
    .with_port(whois_port);
    let fetcher = PageFetcher::new(&FetchConfig {
        connect_timeout: Duration::from_millis(500),
        timeout: Duration::from_secs(2),
    })
    .expect("build fetcher");
    EnrichmentWorker::new(fetcher, whois)
}

/// Enricher that answers instantly with a fixed keyword string.
pub(crate) struct StubEnricher {
    pub keywords: &'static str,
}

#[async_trait]
impl Enricher for StubEnricher {
    async fn enrich(&self, record: &DomainRecord) -> EnrichmentResult {
        EnrichmentResult {
            title: format!("title of {}", record.domain),
            keywords: self.keywords.to_string(),
            expiry_date: Some("2030-01-01 00:00:00".into()),
            ..EnrichmentResult::empty(record.id)
        }
    }
}

/// [`StubEnricher`] that takes `delay` per record.
pub(crate) struct SlowEnricher {
    pub delay: Duration,
}

#[async_trait]
impl Enricher for SlowEnricher {
    async fn enrich(&self, record: &DomainRecord) -> EnrichmentResult {
        tokio::time::sleep(self.delay).await;
        StubEnricher { keywords: "" }.enrich(record).await
    }
}

/// Enricher that never finishes.
pub(crate) struct HangingEnricher;

#[async_trait]
impl Enricher for HangingEnricher {
    async fn enrich(&self, _record: &DomainRecord) -> EnrichmentResult {
        std::future::pending().await
    }
}

/// Sink that remembers every result and optionally forwards it.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub results: Mutex<Vec<EnrichmentResult>>,
    pub inner: Option<Arc<dyn ResultSink>>,
    /// Number of leading calls that fail.
    pub fail_first: Mutex<usize>,
}

impl RecordingSink {
    pub fn forwarding(inner: Arc<dyn ResultSink>) -> Self {
        Self {
            inner: Some(inner),
            ..Default::default()
        }
    }

    pub fn failing(times: usize) -> Self {
        Self {
            fail_first: Mutex::new(times),
            ..Default::default()
        }
    }

    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .results
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.domain_id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn persist(&self, result: &EnrichmentResult) -> Result<()> {
        {
            let mut remaining = self.fail_first.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(NamexError::Storage("database is locked".into()));
            }
        }
        self.results.lock().unwrap().push(result.clone());
        match &self.inner {
            Some(inner) => inner.persist(result).await,
            None => Ok(()),
        }
    }
}
