//! Cycle-level tests of a single source worker

use crate::common::{
    issue, page, settings, start_cursor, ts, untitled_issue, MemoryStore, MockSource,
};
use poll_ingest::embed::{Embedder, ZeroEmbedder};
use poll_ingest::metrics::{self, MetricsRegistry};
use poll_ingest::record::SourceKind;
use poll_ingest::scheduler::{shutdown_channel, CycleOutcome, SourceWorker};
use poll_ingest::sources::{FetchError, FetchedPage, GitHubIssuesClient};
use poll_ingest::state::{SourcePhase, MAX_WAIT};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn worker(source: MockSource, store: &MemoryStore, registry: &Arc<MetricsRegistry>) -> SourceWorker {
    SourceWorker::new(
        Box::new(source),
        Arc::new(store.clone()),
        Arc::clone(registry),
        "fingerprint".to_string(),
        start_cursor(),
        settings(),
    )
}

fn three_items_one_malformed() -> FetchedPage {
    page(
        &start_cursor(),
        vec![
            issue(1, "First", "2024-01-02T00:00:00Z"),
            untitled_issue(2),
            issue(3, "Third", "2024-01-03T00:00:00Z"),
        ],
        Some("2024-01-03T00:00:00Z"),
    )
}

#[tokio::test]
async fn test_malformed_item_is_skipped_and_rest_persisted() {
    let store = MemoryStore::new();
    let registry = Arc::new(MetricsRegistry::new());
    let (source, _calls) = MockSource::new("widgets", vec![Ok(three_items_one_malformed())]);
    let mut worker = worker(source, &store, &registry);

    let outcome = worker.run_cycle().await;

    assert_eq!(
        outcome,
        CycleOutcome::Completed {
            stored: 2,
            skipped: 1,
            has_more: false
        }
    );
    assert_eq!(store.record_count(), 2);
    assert!(store.record(SourceKind::GitHub, "2").is_none());
    assert_eq!(
        registry.get(metrics::MALFORMED_ITEMS, &[("source", "widgets")]),
        Some(1)
    );
    assert_eq!(
        registry.get(metrics::RECORDS, &[("source", "widgets")]),
        Some(2)
    );
    assert_eq!(registry.total(metrics::CYCLE_ERRORS), 0);

    // Cursor moves to the newest item and is stored durably
    let expected_since = ts("2024-01-03T00:00:00Z");
    assert_eq!(worker.state().cursor.since, expected_since);
    assert_eq!(store.cursor("widgets").unwrap().since, expected_since);
}

#[tokio::test]
async fn test_bytes_counter_adds_only_this_batch() {
    let store = MemoryStore::new();
    let registry = Arc::new(MetricsRegistry::new());
    let first = page(
        &start_cursor(),
        vec![issue(1, "First", "2024-01-02T00:00:00Z")],
        Some("2024-01-02T00:00:00Z"),
    );
    let second = page(
        &start_cursor(),
        vec![issue(2, "Second", "2024-01-03T00:00:00Z")],
        Some("2024-01-03T00:00:00Z"),
    );
    let first_size = first.items[0].size_bytes() as u64;
    let second_size = second.items[0].size_bytes() as u64;
    let (source, _calls) = MockSource::new("widgets", vec![Ok(first), Ok(second)]);
    let mut worker = worker(source, &store, &registry);

    worker.run_cycle().await;
    assert_eq!(registry.get(metrics::BYTES, &[("source", "widgets")]), Some(first_size));

    worker.run_cycle().await;
    assert_eq!(
        registry.get(metrics::BYTES, &[("source", "widgets")]),
        Some(first_size + second_size)
    );
}

#[tokio::test]
async fn test_persistence_error_leaves_cursor_unchanged() {
    let store = MemoryStore::new();
    store.fail_batches();
    store.fail_record("3");
    let registry = Arc::new(MetricsRegistry::new());
    let (source, _calls) = MockSource::new("widgets", vec![Ok(three_items_one_malformed())]);
    let mut worker = worker(source, &store, &registry);

    let outcome = worker.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Failed { .. }));
    assert_eq!(worker.state().cursor, start_cursor());
    assert_eq!(worker.state().consecutive_failures, 1);
    assert!(store.cursor("widgets").is_none());
    assert_eq!(
        registry.get(
            metrics::CYCLE_ERRORS,
            &[("source", "widgets"), ("kind", "storage")]
        ),
        Some(1)
    );
    assert_eq!(
        registry.get(metrics::BATCH_FALLBACKS, &[("source", "widgets")]),
        Some(1)
    );
    assert_eq!(registry.get(metrics::RECORDS, &[("source", "widgets")]), None);
}

#[tokio::test]
async fn test_batch_failure_falls_back_to_single_upserts() {
    let store = MemoryStore::new();
    store.fail_batches();
    let registry = Arc::new(MetricsRegistry::new());
    let (source, _calls) = MockSource::new("widgets", vec![Ok(three_items_one_malformed())]);
    let mut worker = worker(source, &store, &registry);

    let outcome = worker.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Completed { stored: 2, .. }));
    assert_eq!(store.record_count(), 2);
    assert!(store.cursor("widgets").is_some());
}

#[tokio::test]
async fn test_cursor_save_failure_fails_cycle() {
    let store = MemoryStore::new();
    store.fail_cursor_saves();
    let registry = Arc::new(MetricsRegistry::new());
    let (source, _calls) = MockSource::new("widgets", vec![Ok(three_items_one_malformed())]);
    let mut worker = worker(source, &store, &registry);

    let outcome = worker.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Failed { .. }));
    assert_eq!(worker.state().cursor, start_cursor());
}

#[tokio::test]
async fn test_refetch_updates_existing_record() {
    let store = MemoryStore::new();
    let registry = Arc::new(MetricsRegistry::new());
    let before = page(
        &start_cursor(),
        vec![issue(1, "Crash on start", "2024-01-02T00:00:00Z")],
        Some("2024-01-02T00:00:00Z"),
    );
    let after = page(
        &start_cursor(),
        vec![issue(1, "Crash on start (fixed)", "2024-01-05T00:00:00Z")],
        Some("2024-01-05T00:00:00Z"),
    );
    let (source, _calls) = MockSource::new("widgets", vec![Ok(before), Ok(after)]);
    let mut worker = worker(source, &store, &registry);

    worker.run_cycle().await;
    worker.run_cycle().await;

    assert_eq!(store.record_count(), 1);
    assert_eq!(
        store.record(SourceKind::GitHub, "1").unwrap().title,
        "Crash on start (fixed)"
    );
}

#[tokio::test]
async fn test_embeddings_are_stored_for_persisted_records() {
    let store = MemoryStore::new();
    let registry = Arc::new(MetricsRegistry::new());
    let (source, _calls) = MockSource::new("widgets", vec![Ok(three_items_one_malformed())]);
    let mut worker = worker(source, &store, &registry).with_embedder(Arc::new(ZeroEmbedder::new(8)));

    worker.run_cycle().await;

    assert_eq!(store.embedding_count(), 2);
}

struct ShortEmbedder;

impl Embedder for ShortEmbedder {
    fn dimension(&self) -> usize {
        8
    }

    fn embed(&self, _text: &str) -> Vec<f32> {
        vec![1.0; 3]
    }
}

#[tokio::test]
async fn test_embeddings_of_wrong_dimension_are_not_stored() {
    let store = MemoryStore::new();
    let registry = Arc::new(MetricsRegistry::new());
    let (source, _calls) = MockSource::new("widgets", vec![Ok(three_items_one_malformed())]);
    let mut worker = worker(source, &store, &registry).with_embedder(Arc::new(ShortEmbedder));

    let outcome = worker.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Completed { stored: 2, .. }));
    assert_eq!(store.record_count(), 2);
    assert_eq!(store.embedding_count(), 0);
}

#[tokio::test]
async fn test_http_error_waits_regular_interval() {
    let store = MemoryStore::new();
    let registry = Arc::new(MetricsRegistry::new());
    let (source, _calls) = MockSource::new(
        "widgets",
        vec![Err(FetchError::Http {
            status: 404,
            url: "http://mock.invalid".to_string(),
        })],
    );
    let mut worker = worker(source, &store, &registry);

    let outcome = worker.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Failed { .. }));
    assert_eq!(worker.state().phase, SourcePhase::Idle);
    assert!(!worker.state().is_backing_off(Instant::now()));
    let wait = worker.state().time_until_next_poll(Instant::now()).unwrap();
    assert!(wait > Duration::from_secs(59) && wait <= Duration::from_secs(60));
    assert_eq!(
        registry.get(metrics::CYCLE_ERRORS, &[("source", "widgets"), ("kind", "http")]),
        Some(1)
    );
}

#[tokio::test]
async fn test_full_page_is_due_immediately() {
    let store = MemoryStore::new();
    let registry = Arc::new(MetricsRegistry::new());
    let cursor = start_cursor();
    let full = FetchedPage {
        next_cursor: cursor.after_page(Some(ts("2024-01-02T00:00:00Z")), true),
        has_more: true,
        ..page(&cursor, vec![issue(1, "First", "2024-01-02T00:00:00Z")], None)
    };
    let (source, calls) = MockSource::new("widgets", vec![Ok(full)]);
    let mut worker = worker(source, &store, &registry);

    worker.run_cycle().await;
    assert!(worker.state().can_poll(Instant::now()));
    assert_eq!(worker.state().cursor.since, ts("2024-01-02T00:00:00Z"));
    assert_eq!(worker.state().cursor.page, 1);

    worker.run_cycle().await;
    assert_eq!(calls.cursors()[1].since, ts("2024-01-02T00:00:00Z"));
    assert!(!worker.state().can_poll(Instant::now()));
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried_within_cycle() {
    let store = MemoryStore::new();
    let registry = Arc::new(MetricsRegistry::new());
    let (source, calls) = MockSource::new(
        "widgets",
        vec![
            Err(FetchError::Transient("connection reset".to_string())),
            Ok(three_items_one_malformed()),
        ],
    );
    let mut worker = worker(source, &store, &registry);

    let outcome = worker.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Completed { stored: 2, .. }));
    let times = calls.call_times();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] >= Duration::from_secs(5));
    assert_eq!(registry.total(metrics::API_CALLS), 2);
    assert_eq!(registry.total(metrics::CYCLE_ERRORS), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_transient_retries_enter_backoff() {
    let store = MemoryStore::new();
    let registry = Arc::new(MetricsRegistry::new());
    let transient = || Err(FetchError::Transient("timeout".to_string()));
    let (source, calls) =
        MockSource::new("widgets", vec![transient(), transient(), transient()]);
    let mut worker = worker(source, &store, &registry);

    let outcome = worker.run_cycle().await;

    assert_eq!(
        outcome,
        CycleOutcome::BackedOff {
            delay: Duration::from_secs(5)
        }
    );
    assert_eq!(calls.count(), 3);
    assert_eq!(worker.state().phase, SourcePhase::BackoffWait);
    assert!(worker.state().is_backing_off(Instant::now()));
    assert_eq!(worker.state().cursor, start_cursor());
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_rate_limit_defers_next_cycle() {
    let store = MemoryStore::new();
    let registry = Arc::new(MetricsRegistry::new());
    let (source, calls) = MockSource::new(
        "widgets",
        vec![
            Ok(three_items_one_malformed()),
            Err(FetchError::RateLimited { retry_after: None }),
        ],
    );
    let worker = worker(source, &store, &registry);

    let (trigger, signal) = shutdown_channel();
    let task = tokio::spawn(worker.run(signal));

    // Cycle 1 at t=0, cycle 2 at t=60 (rate limited), cycle 3 after backoff
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(calls.count(), 2);
    assert_eq!(store.record_count(), 2);
    assert_eq!(registry.total(metrics::CYCLE_ERRORS), 1);
    assert_eq!(
        registry.get(metrics::RATE_LIMITED, &[("source", "widgets")]),
        Some(1)
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    let times = calls.call_times();
    assert_eq!(times.len(), 3);
    assert!(times[2] - times[1] >= Duration::from_secs(5));

    trigger.trigger();
    let state = task.await.unwrap();
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(state.completed_cycles, 2);
    assert_eq!(store.record_count(), 2);
}

#[tokio::test]
async fn test_unbounded_retry_after_is_capped_and_worker_keeps_running() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/issues"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("Retry-After", "18446744073709551615"),
        )
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let registry = Arc::new(MetricsRegistry::new());
    let client = GitHubIssuesClient::new(
        "widgets".to_string(),
        "acme".to_string(),
        "widgets".to_string(),
        server.uri(),
        None,
        100,
        reqwest::Client::new(),
    );
    let mut worker = SourceWorker::new(
        Box::new(client),
        Arc::new(store.clone()),
        Arc::clone(&registry),
        "fingerprint".to_string(),
        start_cursor(),
        settings(),
    );

    let outcome = worker.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::RateLimited { delay: MAX_WAIT });
    let wait = worker.state().time_until_next_poll(Instant::now()).unwrap();
    assert!(wait <= MAX_WAIT && wait > MAX_WAIT - Duration::from_secs(5));

    // The run loop keeps the worker alive while it waits out the backoff
    let (trigger, signal) = shutdown_channel();
    let task = tokio::spawn(worker.run(signal));
    tokio::time::sleep(Duration::from_millis(50)).await;
    trigger.trigger();

    let state = task.await.unwrap();
    assert_eq!(state.phase, SourcePhase::BackoffWait);
    assert_eq!(state.cursor, start_cursor());
    assert_eq!(
        registry.get(metrics::RATE_LIMITED, &[("source", "widgets")]),
        Some(1)
    );
}
