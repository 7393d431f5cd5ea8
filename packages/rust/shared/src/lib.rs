//! Shared types, error model, and configuration for namex.
//!
//! This crate is the foundation depended on by all other namex crates.
//! It provides:
//! - [`NamexError`]: the unified error type
//! - Domain types ([`DomainRecord`], [`EnrichmentResult`], [`EnrichmentStatus`])
//! - Configuration ([`AppConfig`], the runtime configs, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, FetchConfig, HttpConfig, PipelineConfig, PipelineSection, QueueConfig,
    QueueSection, StoreConfig, WhoisConfig, WhoisSection, config_dir, config_file_path,
    init_config, init_config_at, load_config, load_config_from,
};
pub use error::{NamexError, Result};
pub use types::{DomainRecord, EnrichmentResult, EnrichmentStatus};
