//! Persistence of enrichment results.

use std::sync::Arc;

use async_trait::async_trait;
use namex_shared::{EnrichmentResult, Result};
use namex_storage::Storage;
use tracing::{debug, instrument};

/// Persists one [`EnrichmentResult`] at a time.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(&self, result: &EnrichmentResult) -> Result<()>;
}

/// Writes keywords and metadata to the record store.
#[derive(Clone)]
pub struct StorageSink {
    storage: Arc<Storage>,
}

impl StorageSink {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ResultSink for StorageSink {
    /// Replace the keyword set, then write the metadata row.
    ///
    /// Both steps run even if the first fails; the first error is returned.
    #[instrument(skip_all, fields(domain_id = result.domain_id))]
    async fn persist(&self, result: &EnrichmentResult) -> Result<()> {
        let keywords = split_keywords(&result.keywords);
        let keyword_step = if keywords.is_empty() {
            Ok(0)
        } else {
            self.storage
                .replace_keywords(result.domain_id, &keywords)
                .await
        };

        let metadata_step = self.storage.update_metadata(result).await;

        keyword_step?;
        metadata_step?;
        debug!(keywords = keywords.len(), "result persisted");
        Ok(())
    }
}

/// Split a raw `keywords` meta value on commas, trimming and dropping empties.
/// Duplicates are collapsed, first occurrence kept.
pub fn split_keywords(raw: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for keyword in raw.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        if !keywords.iter().any(|k| k == keyword) {
            keywords.push(keyword.to_string());
        }
    }
    keywords
}
