//! Storage module for persisting ingested data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Idempotent record upserts keyed by (source, external_id)
//! - Durable poll cursors so restarts resume where they left off
//! - Run tracking
//! - A shared handle that serializes access to the single connection

mod handle;
mod schema;
mod sqlite;
mod traits;

pub use handle::StoreHandle;
pub use sqlite::SqliteStorage;
pub use traits::{RecordStore, Storage, StorageError, StorageResult};

use crate::state::PollCursor;
use std::path::Path;

/// Opens (or creates) the storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - A backend with the schema applied
/// * `Err(StorageError)` - The file could not be opened or migrated
///
/// # Example
///
/// ```no_run
/// use poll_ingest::storage::{open_storage, Storage};
/// use std::path::Path;
///
/// let storage = open_storage(Path::new("ingest.db")).unwrap();
/// println!("{} records", storage.count_records().unwrap());
/// ```
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// A stored cursor with its bookkeeping columns
#[derive(Debug, Clone, PartialEq)]
pub struct CursorRecord {
    pub source_name: String,
    pub fingerprint: String,
    pub cursor: PollCursor,
    pub updated_at: String,
}

/// Represents an ingest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of an ingest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
