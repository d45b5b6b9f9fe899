//! Statistics generation from the ingest database
//!
//! This module provides functionality for extracting and displaying
//! ingest statistics from the storage layer.

use crate::metrics::MetricSample;
use crate::record::SourceKind;
use crate::storage::{CursorRecord, RunRecord, Storage, StorageResult};
use std::collections::BTreeMap;

/// Number of runs shown by `--stats`
const RECENT_RUN_LIMIT: u32 = 5;

/// Ingest statistics summary
#[derive(Debug, Clone)]
pub struct IngestStatistics {
    /// Total number of stored records
    pub total_records: u64,

    /// Count of records by source
    pub records_by_source: BTreeMap<SourceKind, u64>,

    /// Stored cursor of every source that completed a cycle
    pub cursors: Vec<CursorRecord>,

    /// Most recent runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - Any storage backend
///
/// # Returns
///
/// Record counts per source, every saved cursor and the most recent runs
///
/// # Example
///
/// ```no_run
/// use poll_ingest::output::{load_statistics, print_statistics};
/// use poll_ingest::storage::open_storage;
/// use std::path::Path;
///
/// let storage = open_storage(Path::new("ingest.db")).unwrap();
/// let stats = load_statistics(&storage).unwrap();
/// print_statistics(&stats);
/// ```
pub fn load_statistics(storage: &dyn Storage) -> StorageResult<IngestStatistics> {
    Ok(IngestStatistics {
        total_records: storage.count_records()?,
        records_by_source: storage.count_by_source()?,
        cursors: storage.list_cursors()?,
        recent_runs: storage.recent_runs(RECENT_RUN_LIMIT)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &IngestStatistics) {
    println!("=== Ingest Statistics ===\n");

    println!("Records:");
    println!("  Total: {}", stats.total_records);
    for (source, count) in &stats.records_by_source {
        let percentage = if stats.total_records > 0 {
            (*count as f64 / stats.total_records as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", source, count, percentage);
    }
    println!();

    if !stats.cursors.is_empty() {
        println!("Cursors ({}):", stats.cursors.len());
        for entry in &stats.cursors {
            println!(
                "  - {}: since {} page {} (updated {})",
                entry.source_name,
                entry.cursor.since.to_rfc3339(),
                entry.cursor.page,
                entry.updated_at
            );
        }
        println!();
    }

    if !stats.recent_runs.is_empty() {
        println!("Recent Runs:");
        for run in &stats.recent_runs {
            println!(
                "  #{} {} started {} finished {}",
                run.id,
                run.status.to_db_string(),
                run.started_at,
                run.finished_at.as_deref().unwrap_or("-")
            );
        }
    }
}

/// Prints a metrics snapshot as an aligned table
pub fn print_metrics(samples: &[MetricSample]) {
    println!("=== Metrics ===\n");
    for sample in samples {
        let labels: Vec<String> = sample
            .labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!("  {:<32} {:<40} {}", sample.name, labels.join(","), sample.value);
    }
}
