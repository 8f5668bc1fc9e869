//! Linksweep: a throttled dead-link and missing-image scanner
//!
//! This crate implements the batch scanning and HTTP-probing engine of a
//! content link checker. Work is split into small, resumable batches guarded by
//! an exclusive scan lock, gated by maintenance windows and server load, and
//! probed through a retrying, proxy-aware HTTP client.

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod jobs;
pub mod orchestrator;
pub mod proxy;
pub mod queue;
pub mod scan;
pub mod soft404;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Linksweep operations
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Transport error: {0}")]
    Transport(#[from] http::TransportError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Credential error: {0}")]
    Credential(#[from] proxy::CredentialError),

    #[error("Soft-404 configuration error: {0}")]
    Soft404(#[from] soft404::Soft404Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("A scan is already running")]
    AlreadyRunning,
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid host pattern: {0}")]
    InvalidPattern(String),
}

/// Result type alias for Linksweep operations
pub type Result<T> = std::result::Result<T, SweepError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{LinkStatus, ScanState, ScanStatus};
pub use url::{HostClass, NormalizeFailure, Normalized, Normalizer, OriginContext};
