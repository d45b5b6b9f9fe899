//! Shared storage handle
//!
//! Wraps one backend in `Arc<Mutex<..>>` and runs every call on the blocking
//! pool, so concurrent source workers never interleave writes on the single
//! connection and never block the async runtime.

use crate::record::{Record, SourceKind};
use crate::state::PollCursor;
use crate::storage::traits::{RecordStore, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

type SharedStorage = Arc<Mutex<Box<dyn Storage + Send>>>;

/// Cloneable async handle to a storage backend
#[derive(Clone)]
pub struct StoreHandle {
    inner: SharedStorage,
}

impl StoreHandle {
    pub fn new<S: Storage + Send + 'static>(storage: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(storage))),
        }
    }

    /// Runs `f` against the backend with exclusive access
    pub async fn call<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut dyn Storage) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock().map_err(|_| StorageError::Poisoned)?;
            f(&mut **guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

#[async_trait]
impl RecordStore for StoreHandle {
    async fn upsert(&self, record: Record) -> StorageResult<()> {
        self.call(move |s| s.upsert_record(&record)).await
    }

    async fn upsert_batch(&self, records: Vec<Record>) -> StorageResult<usize> {
        self.call(move |s| s.upsert_records(&records)).await
    }

    async fn count_by_source(&self) -> StorageResult<BTreeMap<SourceKind, u64>> {
        self.call(|s| s.count_by_source()).await
    }

    async fn load_cursor(
        &self,
        source_name: &str,
        fingerprint: &str,
    ) -> StorageResult<Option<PollCursor>> {
        let source_name = source_name.to_string();
        let fingerprint = fingerprint.to_string();
        self.call(move |s| s.load_cursor(&source_name, &fingerprint))
            .await
    }

    async fn save_cursor(
        &self,
        source_name: &str,
        fingerprint: &str,
        cursor: PollCursor,
    ) -> StorageResult<()> {
        let source_name = source_name.to_string();
        let fingerprint = fingerprint.to_string();
        self.call(move |s| s.save_cursor(&source_name, &fingerprint, &cursor))
            .await
    }

    async fn save_embedding(
        &self,
        source: SourceKind,
        external_id: String,
        vector: Vec<f32>,
    ) -> StorageResult<()> {
        self.call(move |s| s.save_embedding(source, &external_id, &vector))
            .await
    }
}
