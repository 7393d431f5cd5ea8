//! Core domain types flowing through the enrichment pipeline.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DomainRecord
// ---------------------------------------------------------------------------

/// A pending domain row read from the record store.
///
/// Serializes as `{"id": .., "domain": ".."}`, which is also the work queue
/// message body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Store-unique key.
    pub id: i64,
    /// Hostname, e.g. `example.com`.
    pub domain: String,
}

impl DomainRecord {
    pub fn new(id: i64, domain: impl Into<String>) -> Self {
        Self {
            id,
            domain: domain.into(),
        }
    }
}

impl std::fmt::Display for DomainRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.domain, self.id)
    }
}

// ---------------------------------------------------------------------------
// EnrichmentResult
// ---------------------------------------------------------------------------

/// Whether every enrichment step succeeded for a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnrichmentStatus {
    /// Page fetch returned 200 and WHOIS answered.
    #[default]
    Complete,
    /// At least one step failed; the affected fields are empty.
    Degraded {
        /// One entry per failed step, e.g. `whois: invalid_domain`.
        reasons: Vec<String>,
    },
}

impl EnrichmentStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Metadata gathered for one [`DomainRecord`], consumed once by the sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    /// Id of the [`DomainRecord`] this result belongs to.
    pub domain_id: i64,
    pub title: String,
    pub description: String,
    pub og_title: String,
    pub og_description: String,
    /// Raw comma-delimited `<meta name="keywords">` content.
    pub keywords: String,
    /// Registry expiry, normalized to `YYYY-MM-DD HH:MM:SS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
    #[serde(default)]
    pub status: EnrichmentStatus,
}

impl EnrichmentResult {
    /// An empty result for `domain_id`, to be filled in step by step.
    pub fn empty(domain_id: i64) -> Self {
        Self {
            domain_id,
            ..Default::default()
        }
    }

    /// Record a failed step, switching the status to degraded.
    pub fn degrade(&mut self, reason: impl Into<String>) {
        match &mut self.status {
            EnrichmentStatus::Complete => {
                self.status = EnrichmentStatus::Degraded {
                    reasons: vec![reason.into()],
                };
            }
            EnrichmentStatus::Degraded { reasons } => reasons.push(reason.into()),
        }
    }
}
