//! Output module for reporting on ingested data
//!
//! This module handles:
//! - Loading statistics from the database
//! - Printing statistics and metric snapshots for the CLI

pub mod stats;

pub use stats::{load_statistics, print_metrics, print_statistics, IngestStatistics};
