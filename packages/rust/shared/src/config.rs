//! Application configuration for namex.
//!
//! User config lives at `~/.namex/namex.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NamexError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "namex.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".namex";

// ---------------------------------------------------------------------------
// Config structs (matching namex.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Record store location.
    #[serde(default)]
    pub store: StoreConfig,

    /// In-process pipeline sizing.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// HTTP page fetch settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// WHOIS settings and server overrides.
    #[serde(default)]
    pub whois: WhoisSection,

    /// Durable work queue settings.
    #[serde(default)]
    pub queue: QueueSection,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "~/.namex/namex.db".into()
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Number of concurrent enrichment workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Number of concurrent sink tasks.
    #[serde(default = "default_sink_workers")]
    pub sink_workers: usize,

    /// Capacity of each inter-stage buffer.
    #[serde(default = "default_buffer")]
    pub buffer: usize,

    /// Also re-enrich rows whose stored expiry date is in the past.
    #[serde(default)]
    pub refresh_expired: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            sink_workers: default_sink_workers(),
            buffer: default_buffer(),
            refresh_expired: false,
        }
    }
}

fn default_workers() -> usize {
    20
}
fn default_sink_workers() -> usize {
    4
}
fn default_buffer() -> usize {
    64
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// TCP/TLS connect timeout in seconds.
    #[serde(default = "default_http_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Total request timeout in seconds (connect + headers + body).
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_http_connect_timeout(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_http_connect_timeout() -> u64 {
    10
}
fn default_http_timeout() -> u64 {
    20
}

/// `[whois]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoisSection {
    /// Upper bound on reading a full WHOIS response, in seconds.
    #[serde(default = "default_whois_read_timeout")]
    pub read_timeout_secs: u64,

    /// Extra or overriding `tld = "whois.server"` entries.
    #[serde(default)]
    pub servers: BTreeMap<String, String>,
}

impl Default for WhoisSection {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_whois_read_timeout(),
            servers: BTreeMap::new(),
        }
    }
}

fn default_whois_read_timeout() -> u64 {
    30
}

/// `[queue]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    /// NATS server URL.
    #[serde(default = "default_queue_url")]
    pub url: String,

    /// JetStream stream holding pending work.
    #[serde(default = "default_queue_stream")]
    pub stream: String,

    /// Subject domain records are published on.
    #[serde(default = "default_queue_subject")]
    pub subject: String,

    /// Durable consumer shared by all workers.
    #[serde(default = "default_queue_consumer")]
    pub consumer: String,

    /// Seconds an unacknowledged message stays with a worker before redelivery.
    #[serde(default = "default_ack_wait")]
    pub ack_wait_secs: u64,

    /// Attempts after which a failing message is acked and logged instead of retried.
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            url: default_queue_url(),
            stream: default_queue_stream(),
            subject: default_queue_subject(),
            consumer: default_queue_consumer(),
            ack_wait_secs: default_ack_wait(),
            max_deliveries: default_max_deliveries(),
        }
    }
}

fn default_queue_url() -> String {
    "nats://localhost:4222".into()
}
fn default_queue_stream() -> String {
    "NAMEX".into()
}
fn default_queue_subject() -> String {
    "namex.domains".into()
}
fn default_queue_consumer() -> String {
    "namex-enrichers".into()
}
fn default_ack_wait() -> u64 {
    120
}
fn default_max_deliveries() -> u64 {
    5
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Enrichment worker pool size (at least 1).
    pub workers: usize,
    /// Sink pool size (at least 1).
    pub sink_workers: usize,
    /// Bounded buffer capacity between stages (at least 1).
    pub buffer: usize,
    /// Include rows whose expiry has passed.
    pub refresh_expired: bool,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            workers: config.pipeline.workers.max(1),
            sink_workers: config.pipeline.sink_workers.max(1),
            buffer: config.pipeline.buffer.max(1),
            refresh_expired: config.pipeline.refresh_expired,
        }
    }
}

/// Runtime HTTP fetch configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.http.connect_timeout_secs),
            timeout: Duration::from_secs(config.http.timeout_secs),
        }
    }
}

/// Runtime WHOIS configuration.
#[derive(Debug, Clone)]
pub struct WhoisConfig {
    pub read_timeout: Duration,
    /// Registry overrides, lowercase TLD → server.
    pub servers: BTreeMap<String, String>,
}

impl Default for WhoisConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for WhoisConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            read_timeout: Duration::from_secs(config.whois.read_timeout_secs),
            servers: config
                .whois
                .servers
                .iter()
                .map(|(tld, server)| (tld.trim_start_matches('.').to_lowercase(), server.clone()))
                .collect(),
        }
    }
}

/// Runtime queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub url: String,
    pub stream: String,
    pub subject: String,
    pub consumer: String,
    pub ack_wait: Duration,
    pub max_deliveries: u64,
}

impl From<&AppConfig> for QueueConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            url: config.queue.url.clone(),
            stream: config.queue.stream.clone(),
            subject: config.queue.subject.clone(),
            consumer: config.queue.consumer.clone(),
            ack_wait: Duration::from_secs(config.queue.ack_wait_secs),
            max_deliveries: config.queue.max_deliveries.max(1),
        }
    }
}

impl StoreConfig {
    /// Resolve `~/` against the home directory.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match self.path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir()
                    .ok_or_else(|| NamexError::config("could not determine home directory"))?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.path)),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.namex/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| NamexError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.namex/namex.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NamexError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| NamexError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    init_config_at(&config_file_path()?)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<PathBuf> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| NamexError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| NamexError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| NamexError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path.to_path_buf())
}
