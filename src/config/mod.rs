//! Configuration module for Poll-Ingest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use poll_ingest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("ingest.toml")).unwrap();
//! println!("Polling {} sources", config.sources.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, EmbeddingConfig, MetricsConfig, OutputConfig, SchedulerConfig, SourceConfig,
    SourceTarget, UserAgentConfig, DEFAULT_GITHUB_ENDPOINT, DEFAULT_STACKEXCHANGE_ENDPOINT,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
