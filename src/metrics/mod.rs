//! Operational counters
//!
//! [`MetricsRegistry`] records counters into its own Prometheus recorder;
//! [`server`] exposes the rendered exposition over HTTP.

mod registry;
pub mod server;

pub use registry::{Labels, MetricSample, MetricsRegistry};

/// Requests sent to a source API, including retries
pub const API_CALLS: &str = "ingest_api_calls_total";
/// Records persisted
pub const RECORDS: &str = "ingest_records_total";
/// Serialized size of persisted raw items, in bytes
pub const BYTES: &str = "ingest_bytes_total";
pub const MALFORMED_ITEMS: &str = "ingest_malformed_items_total";
/// Cycles that ended without persisting
pub const CYCLE_ERRORS: &str = "ingest_cycle_errors_total";
pub const RATE_LIMITED: &str = "ingest_rate_limited_total";
pub const CYCLES: &str = "ingest_cycles_total";
/// Batches that fell back to single-record upserts
pub const BATCH_FALLBACKS: &str = "ingest_batch_fallbacks_total";

/// Registers HELP text for every counter the pipeline emits
pub fn describe_defaults(registry: &MetricsRegistry) {
    registry.describe(API_CALLS, "Requests sent to source APIs");
    registry.describe(RECORDS, "Records persisted to the store");
    registry.describe(BYTES, "Serialized bytes of persisted items");
    registry.describe(MALFORMED_ITEMS, "Items skipped because they could not be normalized");
    registry.describe(CYCLE_ERRORS, "Poll cycles that failed");
    registry.describe(RATE_LIMITED, "Rate limit responses from source APIs");
    registry.describe(CYCLES, "Poll cycles that completed");
    registry.describe(BATCH_FALLBACKS, "Batches retried as single-record upserts");
}
