//! Per-source poll worker
//!
//! A [`SourceWorker`] owns one source's client and [`SourceState`] and drives
//! it through `Fetching → Normalizing → Persisting` once per cycle. Failures
//! never leave the worker: they are counted, logged and turned into a wait.

use crate::embed::Embedder;
use crate::metrics::{self, MetricsRegistry};
use crate::record::{normalize, Record};
use crate::scheduler::ShutdownSignal;
use crate::sources::{FetchError, FetchedPage, SourceClient};
use crate::state::{BackoffPolicy, PollCursor, SourcePhase, SourceState};
use crate::storage::{RecordStore, StorageResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Timing knobs for one worker
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Wait between cycles that drained the window
    pub interval: Duration,
    pub backoff: BackoffPolicy,
    /// Extra attempts for transient errors within one cycle
    pub max_transient_retries: u32,
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed {
        stored: usize,
        skipped: usize,
        has_more: bool,
    },
    /// The source asked us to slow down
    RateLimited { delay: Duration },
    /// Transient errors persisted through every retry
    BackedOff { delay: Duration },
    /// Nothing was persisted; the cursor is unchanged
    Failed { error: String },
}

pub struct SourceWorker {
    client: Box<dyn SourceClient>,
    store: Arc<dyn RecordStore>,
    metrics: Arc<MetricsRegistry>,
    embedder: Option<Arc<dyn Embedder>>,
    fingerprint: String,
    settings: WorkerSettings,
    state: SourceState,
}

impl SourceWorker {
    pub fn new(
        client: Box<dyn SourceClient>,
        store: Arc<dyn RecordStore>,
        metrics: Arc<MetricsRegistry>,
        fingerprint: String,
        cursor: PollCursor,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            client,
            store,
            metrics,
            embedder: None,
            fingerprint,
            settings,
            state: SourceState::new(cursor, Instant::now()),
        }
    }

    /// Stores an embedding for every persisted record
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn name(&self) -> &str {
        self.client.name()
    }

    pub fn state(&self) -> &SourceState {
        &self.state
    }

    /// Polls until `shutdown` fires, then returns the final state
    ///
    /// A cycle that has started runs to completion; shutdown is only observed
    /// between cycles.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> SourceState {
        tracing::info!(
            source = %self.name(),
            target = %self.client.target_label(),
            since = %self.state.cursor.since,
            "Source worker started"
        );

        while !shutdown.is_triggered() {
            if let Some(wait) = self.state.time_until_next_poll(Instant::now()) {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                continue;
            }

            self.run_cycle().await;
        }

        tracing::info!(
            source = %self.name(),
            cycles = self.state.completed_cycles,
            "Source worker stopped"
        );
        self.state
    }

    /// Runs one full cycle and updates the schedule accordingly
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let name = self.client.name().to_string();
        let target = self.client.target_label();

        self.state.enter(SourcePhase::Fetching);
        let page = match self.fetch_with_retry(&name, &target).await {
            Ok(page) => page,
            Err(error) => return self.handle_fetch_error(&name, error),
        };

        self.state.enter(SourcePhase::Normalizing);
        let fetched_at = Utc::now();
        let mut records = Vec::with_capacity(page.items.len());
        let mut skipped = 0;
        for item in &page.items {
            match normalize(item, fetched_at) {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    self.metrics
                        .increment(metrics::MALFORMED_ITEMS, &[("source", name.as_str())]);
                    tracing::warn!(source = %name, error = %e, "Skipping malformed item");
                }
            }
        }

        self.state.enter(SourcePhase::Persisting);
        if let Err(e) = self.persist(&name, &records, &page.next_cursor).await {
            self.metrics.increment(
                metrics::CYCLE_ERRORS,
                &[("source", name.as_str()), ("kind", "storage")],
            );
            self.state
                .record_failure(Instant::now(), self.settings.interval);
            tracing::error!(
                source = %name,
                error = %e,
                "Failed to persist page, cursor left unchanged"
            );
            return CycleOutcome::Failed {
                error: e.to_string(),
            };
        }

        let bytes: u64 = records.iter().map(|r| r.size_estimate as u64).sum();
        let labels = [("source", name.as_str())];
        self.metrics
            .add_amount(metrics::RECORDS, &labels, records.len() as u64);
        self.metrics.add_amount(metrics::BYTES, &labels, bytes);
        self.metrics.increment(metrics::CYCLES, &labels);

        self.state.record_success(
            page.next_cursor,
            Instant::now(),
            self.settings.interval,
            page.has_more,
            page.min_delay,
        );

        tracing::info!(
            source = %name,
            stored = records.len(),
            skipped,
            has_more = page.has_more,
            since = %self.state.cursor.since,
            page = self.state.cursor.page,
            "Cycle complete"
        );

        CycleOutcome::Completed {
            stored: records.len(),
            skipped,
            has_more: page.has_more,
        }
    }

    async fn fetch_with_retry(&self, name: &str, target: &str) -> Result<FetchedPage, FetchError> {
        let mut attempt = 0;
        loop {
            self.metrics.increment(
                metrics::API_CALLS,
                &[("source", name), ("target", target)],
            );

            match self.client.fetch_page(&self.state.cursor).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.settings.max_transient_retries => {
                    attempt += 1;
                    let delay = self.settings.backoff.delay_for(attempt, None);
                    tracing::warn!(
                        source = %name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient fetch error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_fetch_error(&mut self, name: &str, error: FetchError) -> CycleOutcome {
        self.metrics.increment(
            metrics::CYCLE_ERRORS,
            &[("source", name), ("kind", error.kind_label())],
        );
        let now = Instant::now();

        match error {
            FetchError::RateLimited { retry_after } => {
                self.metrics.increment(metrics::RATE_LIMITED, &[("source", name)]);
                let delay = self
                    .state
                    .enter_backoff(now, &self.settings.backoff, retry_after);
                tracing::warn!(
                    source = %name,
                    delay_secs = delay.as_secs_f64(),
                    failures = self.state.consecutive_failures,
                    "Rate limited, backing off"
                );
                CycleOutcome::RateLimited { delay }
            }
            FetchError::Transient(message) => {
                let delay = self.state.enter_backoff(now, &self.settings.backoff, None);
                tracing::warn!(
                    source = %name,
                    delay_secs = delay.as_secs_f64(),
                    error = %message,
                    "Transient errors exhausted retries, backing off"
                );
                CycleOutcome::BackedOff { delay }
            }
            other => {
                self.state.record_failure(now, self.settings.interval);
                tracing::error!(source = %name, error = %other, "Fetch failed");
                CycleOutcome::Failed {
                    error: other.to_string(),
                }
            }
        }
    }

    /// Writes records, embeddings and finally the cursor
    ///
    /// The cursor is only saved once every record is stored.
    async fn persist(
        &self,
        name: &str,
        records: &[Record],
        next_cursor: &PollCursor,
    ) -> StorageResult<()> {
        if !records.is_empty() {
            if let Err(e) = self.store.upsert_batch(records.to_vec()).await {
                self.metrics
                    .increment(metrics::BATCH_FALLBACKS, &[("source", name)]);
                tracing::warn!(
                    source = %name,
                    error = %e,
                    "Batch upsert failed, falling back to single-record upserts"
                );

                let mut first_error = None;
                for record in records {
                    if let Err(e) = self.store.upsert(record.clone()).await {
                        tracing::warn!(
                            source = %name,
                            external_id = %record.external_id,
                            error = %e,
                            "Failed to store record"
                        );
                        first_error.get_or_insert(e);
                    }
                }
                if let Some(e) = first_error {
                    return Err(e);
                }
            }
        }

        if let Some(embedder) = &self.embedder {
            for record in records {
                let vector = embedder.embed(&record.title);
                if vector.len() != embedder.dimension() {
                    tracing::warn!(
                        source = %name,
                        external_id = %record.external_id,
                        expected = embedder.dimension(),
                        actual = vector.len(),
                        "Embedding has the wrong dimension, not stored"
                    );
                    continue;
                }
                self.store
                    .save_embedding(record.source, record.external_id.clone(), vector)
                    .await?;
            }
        }

        self.store
            .save_cursor(name, &self.fingerprint, next_cursor.clone())
            .await?;
        Ok(())
    }
}
