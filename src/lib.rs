//! Poll-Ingest: a polling ingestion pipeline
//!
//! This crate periodically fetches paginated items from external HTTP sources
//! (GitHub issues, StackExchange search), normalizes them into typed records,
//! persists them idempotently to SQLite, and exposes operational counters.

pub mod config;
pub mod embed;
pub mod metrics;
pub mod output;
pub mod record;
pub mod scheduler;
pub mod sources;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Poll-Ingest operations
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
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
}

/// Result type alias for Poll-Ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use metrics::MetricsRegistry;
pub use record::{Record, SourceKind};
pub use state::{PollCursor, SourcePhase, SourceState};
