use backfill::error::ErrorKind;
use backfill::source::memory::MemorySource;
use backfill::state::table::TablePhase;
use backfill::test_utils::notifying_destination::NotifyingDestination;
use backfill::test_utils::notifying_store::NotifyingProgressStore;
use backfill::test_utils::pipeline::create_pipeline;
use backfill::pipeline::Pipeline;
use backfill::test_utils::table::{
    expected_rows, key, row, seed_table, test_config, test_table_config,
};
use backfill::types::TableName;
use backfill::workers::table::TableWorkerStats;
use telemetry::tracing::init_test_tracing;

/// Returns the stats of the only table of `pipeline`.
async fn single_table_stats(pipeline: &Pipeline) -> TableWorkerStats {
    let (handle, _) = pipeline.arena().iter().next().unwrap();
    let state = pipeline.worker_state(handle).await.unwrap();
    let state = state.lock().await;

    state.stats()
}

#[tokio::test(flavor = "multi_thread")]
async fn tailer_disconnect_restarts_from_acknowledged_position() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=20, "v0");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    let writer = source.clone();
    source.after_next_chunk_read(move || {
        writer.update("users", 3i64, row("v1"));
        writer.disconnect_streams();
    });

    let streaming = store
        .notify_on_progress("users", |progress| progress.phase == TablePhase::Streaming)
        .await;
    let mut expected = expected_rows(1..=20, "v0");
    expected.insert(key(3), row("v1"));
    let rows = destination.wait_for_rows("users", expected).await;

    let mut pipeline = create_pipeline(
        test_config(vec![test_table_config("users")], 5),
        &source,
        &destination,
        &store,
    );
    pipeline.start().await.unwrap();

    rows.notified().await;
    streaming.notified().await;

    let stats = single_table_stats(&pipeline).await;
    assert!(stats.tailer_restarts >= 1);
    assert!(stats.chunk_retries >= 1);
    assert_eq!(stats.chunks_completed, 4);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn swallowed_marker_is_retried() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=10, "v0");
    source.swallow_next_markers(1);
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    let mut config = test_config(vec![test_table_config("users")], 5);
    config.marker_timeout_ms = 200;

    let streaming = store
        .notify_on_progress("users", |progress| progress.phase == TablePhase::Streaming)
        .await;
    let rows = destination
        .wait_for_rows("users", expected_rows(1..=10, "v0"))
        .await;

    let mut pipeline = create_pipeline(config, &source, &destination, &store);
    pipeline.start().await.unwrap();

    rows.notified().await;
    streaming.notified().await;

    assert!(single_table_stats(&pipeline).await.chunk_retries >= 1);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_source_failures_are_retried() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=10, "v0");
    source.fail_next_reads(2);
    source.fail_next_scans(1);
    source.fail_next_marker_writes(1);
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    let streaming = store
        .notify_on_progress("users", |progress| progress.phase == TablePhase::Streaming)
        .await;
    let rows = destination
        .wait_for_rows("users", expected_rows(1..=10, "v0"))
        .await;

    let mut config = test_config(vec![test_table_config("users")], 5);
    config.retry.max_attempts = 10;

    let mut pipeline = create_pipeline(config, &source, &destination, &store);
    pipeline.start().await.unwrap();

    rows.notified().await;
    streaming.notified().await;

    assert!(single_table_stats(&pipeline).await.chunk_retries >= 4);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_stop_the_table() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=10, "v0");
    source.fail_next_reads(100);
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    let mut pipeline = create_pipeline(
        test_config(vec![test_table_config("users")], 5),
        &source,
        &destination,
        &store,
    );
    pipeline.start().await.unwrap();

    let err = pipeline.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SnapshotReadFailed);

    assert!(destination.deliveries().await.is_empty());
    assert!(destination.shutdown_called().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_order_scan_stops_the_table() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=10, "v0");
    source.reverse_next_scans(1);
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    let mut pipeline = create_pipeline(
        test_config(vec![test_table_config("users")], 5),
        &source,
        &destination,
        &store,
    );
    pipeline.start().await.unwrap();

    let err = pipeline.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageCorrupt);
    assert!(destination.deliveries().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_destination_stops_the_table() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=10, "v0");
    let destination = NotifyingDestination::new();
    destination.memory().fail_next_pushes(10).await;
    let store = NotifyingProgressStore::new();

    let mut pipeline = create_pipeline(
        test_config(vec![test_table_config("users")], 5),
        &source,
        &destination,
        &store,
    );
    pipeline.start().await.unwrap();

    let err = pipeline.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DestinationPushFailed);

    // Only the initial progress was stored, no chunk completed.
    let history = store
        .memory()
        .history(&TableName::from("users"))
        .await;
    assert_eq!(history.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_table_does_not_stop_other_tables() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=10, "v0");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    let rows = destination
        .wait_for_rows("users", expected_rows(1..=10, "v0"))
        .await;

    // The source has no `missing` table, so its worker fails before backfilling.
    let mut pipeline = create_pipeline(
        test_config(
            vec![test_table_config("users"), test_table_config("missing")],
            5,
        ),
        &source,
        &destination,
        &store,
    );
    pipeline.start().await.unwrap();
    rows.notified().await;

    let err = pipeline.shutdown_and_wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
}
