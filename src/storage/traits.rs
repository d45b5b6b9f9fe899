//! Storage traits and error types
//!
//! [`Storage`] is the synchronous backend interface, implemented by
//! [`SqliteStorage`](crate::storage::SqliteStorage). [`RecordStore`] is the
//! async interface the pipeline uses; [`StoreHandle`](crate::storage::StoreHandle)
//! implements it by serializing calls onto a single backend.

use crate::record::{Record, SourceKind};
use crate::state::PollCursor;
use crate::storage::{CursorRecord, RunRecord, RunStatus};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Methods take `&mut self` for writes; callers that share a backend across
/// tasks go through [`StoreHandle`](crate::storage::StoreHandle).
pub trait Storage {
    // ===== Records =====

    /// Inserts a record or updates the row with the same (source, external_id)
    ///
    /// # Arguments
    ///
    /// * `record` - The normalized record; mutable fields overwrite the stored row
    ///
    /// `first_seen_at` of an existing row is never changed.
    fn upsert_record(&mut self, record: &Record) -> StorageResult<()>;

    /// Upserts all records in one transaction; nothing is written on error
    ///
    /// # Returns
    ///
    /// The number of records written
    fn upsert_records(&mut self, records: &[Record]) -> StorageResult<usize>;

    fn get_record(&self, source: SourceKind, external_id: &str) -> StorageResult<Option<Record>>;

    /// Number of stored records per source
    fn count_by_source(&self) -> StorageResult<BTreeMap<SourceKind, u64>>;

    fn count_records(&self) -> StorageResult<u64>;

    // ===== Cursors =====

    /// Loads the cursor saved for `source_name` if its fingerprint matches
    ///
    /// # Arguments
    ///
    /// * `source_name` - Configured name of the source
    /// * `fingerprint` - Fingerprint of the current source definition
    ///
    /// # Returns
    ///
    /// * `Ok(Some(cursor))` - A cursor saved under the same definition
    /// * `Ok(None)` - No cursor, or one saved for a different definition
    fn load_cursor(&self, source_name: &str, fingerprint: &str)
        -> StorageResult<Option<PollCursor>>;

    /// Saves the cursor for `source_name`, replacing any previous one
    fn save_cursor(
        &mut self,
        source_name: &str,
        fingerprint: &str,
        cursor: &PollCursor,
    ) -> StorageResult<()>;

    fn list_cursors(&self) -> StorageResult<Vec<CursorRecord>>;

    // ===== Embeddings =====

    /// Stores `vector` for a record, replacing any previous vector
    fn save_embedding(
        &mut self,
        source: SourceKind,
        external_id: &str,
        vector: &[f32],
    ) -> StorageResult<()>;

    fn get_embedding(&self, source: SourceKind, external_id: &str)
        -> StorageResult<Option<Vec<f32>>>;

    // ===== Run Management =====

    /// Creates a new ingest run in the `running` state
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Sets the final status and finish timestamp of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Most recent runs, newest first
    fn recent_runs(&self, limit: u32) -> StorageResult<Vec<RunRecord>>;
}

/// Async persistence interface used by source workers
///
/// Implementations must tolerate concurrent calls from every worker task.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn upsert(&self, record: Record) -> StorageResult<()>;

    async fn upsert_batch(&self, records: Vec<Record>) -> StorageResult<usize>;

    async fn count_by_source(&self) -> StorageResult<BTreeMap<SourceKind, u64>>;

    async fn load_cursor(
        &self,
        source_name: &str,
        fingerprint: &str,
    ) -> StorageResult<Option<PollCursor>>;

    async fn save_cursor(
        &self,
        source_name: &str,
        fingerprint: &str,
        cursor: PollCursor,
    ) -> StorageResult<()>;

    async fn save_embedding(
        &self,
        source: SourceKind,
        external_id: String,
        vector: Vec<f32>,
    ) -> StorageResult<()>;
}
