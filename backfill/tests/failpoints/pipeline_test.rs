use backfill::error::ErrorKind;
use backfill::failpoints::{CHUNK_BEFORE_HIGH_MARKER, CHUNK_BEFORE_MERGE};
use backfill::source::memory::MemorySource;
use backfill::state::table::TablePhase;
use backfill::test_utils::failpoints::CustomFailScenario;
use backfill::test_utils::notifying_destination::NotifyingDestination;
use backfill::test_utils::notifying_store::NotifyingProgressStore;
use backfill::test_utils::pipeline::create_pipeline;
use backfill::test_utils::table::{
    expected_rows, key, row, seed_table, test_config, test_table_config,
};
use backfill::types::{Delivery, TableName};
use telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn chunk_failing_before_merge_is_retried() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(CHUNK_BEFORE_MERGE, "1*return(timed_retry)")]);

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=10, "v0");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    let streaming = store
        .notify_on_progress("users", |progress| progress.phase == TablePhase::Streaming)
        .await;
    let rows = destination
        .wait_for_rows("users", expected_rows(1..=10, "v0"))
        .await;

    let mut pipeline = create_pipeline(
        test_config(vec![test_table_config("users")], 5),
        &source,
        &destination,
        &store,
    );
    pipeline.start().await.unwrap();

    rows.notified().await;
    streaming.notified().await;

    let (handle, _) = pipeline.arena().iter().next().unwrap();
    let state = pipeline.worker_state(handle).await.unwrap();
    let stats = state.lock().await.stats();
    assert_eq!(stats.chunk_retries, 1);
    assert_eq!(stats.chunks_completed, 2);

    pipeline.shutdown_and_wait().await.unwrap();

    // The failed attempt never reached the destination.
    assert_eq!(destination.deliveries().await.len(), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn retried_chunk_converges_with_writes_after_its_window() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(CHUNK_BEFORE_MERGE, "1*return(timed_retry)")]);

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=2, "v0");
    seed_table(&source, "users", 4..=10, "v0");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    // Key 3 is inserted right behind the high marker of the failing attempt, then deleted inside
    // the window of the retried one.
    let writer = source.clone();
    source.after_next_high_marker(move || writer.insert("users", 3i64, row("v1")));
    source.after_next_chunk_read(|| {});
    let writer = source.clone();
    source.after_next_chunk_read(move || writer.delete("users", 3i64));

    let streaming = store
        .notify_on_progress("users", |progress| progress.phase == TablePhase::Streaming)
        .await;

    let mut pipeline = create_pipeline(
        test_config(vec![test_table_config("users")], 5),
        &source,
        &destination,
        &store,
    );
    pipeline.start().await.unwrap();

    streaming.notified().await;

    let (handle, _) = pipeline.arena().iter().next().unwrap();
    let state = pipeline.worker_state(handle).await.unwrap();
    let stats = state.lock().await.stats();
    assert_eq!(stats.chunk_retries, 1);
    assert_eq!(stats.chunks_completed, 2);

    pipeline.shutdown_and_wait().await.unwrap();

    let table = TableName::from("users");
    let rows = destination.materialized(&table).await;
    assert!(!rows.contains_key(&key(3)));
    assert_eq!(rows, source.rows(&table));

    let mut expected = expected_rows(1..=2, "v0");
    expected.extend(expected_rows(4..=10, "v0"));
    assert_eq!(rows, expected);

    // The insert queued after the failed window never reached the destination.
    let deliveries = destination.deliveries().await;
    assert_eq!(deliveries.len(), 9);
    assert!(
        deliveries
            .iter()
            .all(|delivery| matches!(delivery, Delivery::Row { .. }))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn chunk_failing_without_retry_stops_the_table() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(CHUNK_BEFORE_HIGH_MARKER, "return(no_retry)")]);

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=10, "v0");
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
    assert_eq!(err.kind(), ErrorKind::WithNoRetry);

    assert!(destination.deliveries().await.is_empty());
}
