//! Error types for namex.
//!
//! Library crates use [`NamexError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all namex operations.
#[derive(Debug, thiserror::Error)]
pub enum NamexError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Hostname cannot be split into at least two non-empty labels.
    #[error("invalid domain name '{domain}'")]
    InvalidDomain { domain: String },

    /// No WHOIS server is registered for the zone.
    #[error("no WHOIS server for zone '{zone}' (domain {domain})")]
    UnknownZone { zone: String, domain: String },

    /// TCP connection to a WHOIS server failed.
    #[error("connect to {server} failed: {source}")]
    Connect {
        server: String,
        source: std::io::Error,
    },

    /// TCP connection to a WHOIS server did not complete in time.
    #[error("connect to {server} timed out")]
    ConnectTimeout { server: String },

    /// Network/HTTP transport error (fetch, WHOIS read).
    #[error("network error: {0}")]
    Network(String),

    /// Page answered with a status other than 200.
    #[error("{url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// Response body or message payload could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Work queue (broker) error.
    #[error("queue error: {0}")]
    Queue(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad input file, bad flag value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NamexError>;

impl NamexError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short, stable label for the error kind, used in degraded-result reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::InvalidDomain { .. } => "invalid_domain",
            Self::UnknownZone { .. } => "unknown_zone",
            Self::Connect { .. } => "connect",
            Self::ConnectTimeout { .. } => "connect_timeout",
            Self::Network(_) => "network",
            Self::HttpStatus { .. } => "http_status",
            Self::Parse { .. } => "parse",
            Self::Storage(_) => "storage",
            Self::Queue(_) => "queue",
            Self::Io { .. } => "io",
            Self::Validation { .. } => "validation",
        }
    }
}
