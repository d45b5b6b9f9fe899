//! Scheduler for running every configured source
//!
//! This module handles:
//! - Building one [`SourceWorker`] per configured source
//! - Resuming durable cursors from the store
//! - Running each worker in its own task on its own interval
//! - Graceful shutdown with a bounded wait for in-flight cycles

mod worker;

pub use worker::{CycleOutcome, SourceWorker, WorkerSettings};

use crate::config::Config;
use crate::embed::{Embedder, ZeroEmbedder};
use crate::metrics::MetricsRegistry;
use crate::sources::{build_http_client, build_source_client};
use crate::state::PollCursor;
use crate::storage::RecordStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Creates a connected trigger/signal pair
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Sending half of the shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half of the shutdown signal; cheap to clone
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered or the trigger is dropped
    pub async fn wait(&mut self) {
        // wait_for errors only when the sender is gone
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// What happened to the workers during shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that stopped on their own
    pub finished: usize,
    /// Workers whose task panicked
    pub failed: usize,
    /// Workers aborted after the timeout
    pub aborted: usize,
}

pub struct Scheduler {
    workers: Vec<SourceWorker>,
    shutdown_timeout: Duration,
}

impl Scheduler {
    pub fn new(workers: Vec<SourceWorker>, shutdown_timeout: Duration) -> Self {
        Self {
            workers,
            shutdown_timeout,
        }
    }

    /// Builds a worker for every configured source
    ///
    /// Each source resumes from its stored cursor when the source definition
    /// is unchanged, and otherwise starts `days-back` days in the past.
    pub async fn from_config(
        config: &Config,
        store: Arc<dyn RecordStore>,
        metrics: Arc<MetricsRegistry>,
    ) -> crate::Result<Self> {
        let http = build_http_client(&config.user_agent)?;
        let embedder: Option<Arc<dyn Embedder>> = config
            .embedding
            .as_ref()
            .map(|e| Arc::new(ZeroEmbedder::new(e.dimension)) as Arc<dyn Embedder>);
        let settings_base = WorkerSettings {
            interval: config.scheduler.poll_interval(),
            backoff: config.scheduler.backoff_policy(),
            max_transient_retries: config.scheduler.max_transient_retries,
        };

        let mut workers = Vec::with_capacity(config.sources.len());
        for source in &config.sources {
            let client = build_source_client(source, http.clone(), config.scheduler.page_size)?;
            let fingerprint = source.fingerprint();

            let cursor = match store.load_cursor(&source.name, &fingerprint).await? {
                Some(cursor) => {
                    tracing::info!(
                        source = %source.name,
                        since = %cursor.since,
                        page = cursor.page,
                        "Resuming from stored cursor"
                    );
                    cursor
                }
                None => PollCursor::starting(source.days_back, Utc::now()),
            };

            let settings = WorkerSettings {
                interval: source.poll_interval(&config.scheduler),
                ..settings_base
            };

            let mut worker = SourceWorker::new(
                client,
                Arc::clone(&store),
                Arc::clone(&metrics),
                fingerprint,
                cursor,
                settings,
            );
            if let Some(embedder) = &embedder {
                worker = worker.with_embedder(Arc::clone(embedder));
            }
            workers.push(worker);
        }

        Ok(Self::new(workers, config.scheduler.shutdown_timeout()))
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name()).collect()
    }

    /// Runs exactly one cycle per source concurrently
    ///
    /// Outcomes are returned sorted by source name.
    pub async fn run_once(self) -> Vec<(String, CycleOutcome)> {
        let mut set = JoinSet::new();
        for mut worker in self.workers {
            set.spawn(async move {
                let outcome = worker.run_cycle().await;
                (worker.name().to_string(), outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(result) = set.join_next().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!("Source task failed: {}", e),
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes
    }

    /// Runs every source until `shutdown` fires
    ///
    /// Workers finish their in-flight cycle and stop. Any still running after
    /// the shutdown timeout are aborted; an aborted cycle never saved its
    /// cursor, so it is refetched on the next start.
    pub async fn run_until(self, mut shutdown: ShutdownSignal) -> ShutdownReport {
        let mut handles = Vec::with_capacity(self.workers.len());
        for worker in self.workers {
            let name = worker.name().to_string();
            let signal = shutdown.clone();
            handles.push((name, tokio::spawn(worker.run(signal))));
        }
        tracing::info!("Scheduler started with {} sources", handles.len());

        shutdown.wait().await;
        tracing::info!(
            "Shutdown requested, waiting up to {:?} for in-flight cycles",
            self.shutdown_timeout
        );

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let mut report = ShutdownReport::default();
        for (name, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(_state)) => report.finished += 1,
                Ok(Err(e)) => {
                    tracing::error!(source = %name, "Source task failed: {}", e);
                    report.failed += 1;
                }
                Err(_) => {
                    tracing::warn!(source = %name, "Source did not stop in time, aborting");
                    handle.abort();
                    report.aborted += 1;
                }
            }
        }

        tracing::info!(
            finished = report.finished,
            failed = report.failed,
            aborted = report.aborted,
            "Scheduler stopped"
        );
        report
    }
}
