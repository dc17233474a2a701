use backfill::state::table::{TablePhase, TableProgress};
use backfill::store::ProgressStore;
use backfill::source::memory::MemorySource;
use backfill::test_utils::notifying_destination::NotifyingDestination;
use backfill::test_utils::notifying_store::NotifyingProgressStore;
use backfill::test_utils::pipeline::create_pipeline;
use backfill::test_utils::table::{
    expected_rows, key, row, seed_table, test_config, test_table_config,
};
use backfill::types::{Delivery, LogPosition, PrimaryKey, TableName};
use telemetry::tracing::init_test_tracing;

fn row_keys(deliveries: &[Delivery]) -> Vec<PrimaryKey> {
    deliveries
        .iter()
        .filter_map(|delivery| match delivery {
            Delivery::Row { row, .. } => Some(row.key.clone()),
            Delivery::Change(_) => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn backfill_resumes_after_last_completed_chunk() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=20, "v0");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    store
        .store_progress(
            &TableName::from("users"),
            TableProgress::snapshotting(Some(key(10)), key(20), source.current_position()),
        )
        .await
        .unwrap();

    let streaming = store
        .notify_on_progress("users", |progress| progress.phase == TablePhase::Streaming)
        .await;
    let rows = destination
        .wait_for_rows("users", expected_rows(11..=20, "v0"))
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
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(
        row_keys(&destination.deliveries().await),
        (11..=20).map(key).collect::<Vec<_>>()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn changes_made_while_stopped_are_replayed() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=10, "v0");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    // First run backfills the table and stops once streaming.
    let streaming = store
        .notify_on_progress("users", |progress| progress.phase == TablePhase::Streaming)
        .await;
    let mut pipeline = create_pipeline(
        test_config(vec![test_table_config("users")], 4),
        &source,
        &destination,
        &store,
    );
    pipeline.start().await.unwrap();
    streaming.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    source.update("users", 2i64, row("v1"));
    source.delete("users", 7i64);
    source.insert("users", 11i64, row("v1"));

    // Second run only streams what happened in between.
    let destination = NotifyingDestination::new();
    let rows = destination
        .notify_on_rows("users", |rows| rows.len() == 2)
        .await;
    let mut pipeline = create_pipeline(
        test_config(vec![test_table_config("users")], 4),
        &source,
        &destination,
        &store,
    );
    pipeline.start().await.unwrap();
    rows.notified().await;

    let caught_up = store
        .notify_on_progress("users", {
            let head = source.current_position();
            move |progress: &TableProgress| progress.position >= head
        })
        .await;
    caught_up.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    let deliveries = destination.deliveries().await;
    assert!(row_keys(&deliveries).is_empty());

    let changed: Vec<_> = deliveries
        .iter()
        .filter_map(|delivery| match delivery {
            Delivery::Change(event) => Some(event.key.clone()),
            Delivery::Row { .. } => None,
        })
        .collect();
    assert_eq!(changed, vec![key(2), key(7), key(11)]);

    let progress = store
        .load_progress(&TableName::from("users"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.phase, TablePhase::Streaming);
    assert_eq!(progress.position, source.current_position());
}

#[tokio::test(flavor = "multi_thread")]
async fn resume_position_overrides_stored_position() {
    init_test_tracing();

    let source = MemorySource::new();
    source.create_table("users");
    source.insert("users", 1i64, row("v0"));
    let skipped = source.current_position();
    source.insert("users", 2i64, row("v0"));

    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();
    store
        .store_progress(
            &TableName::from("users"),
            TableProgress::streaming(None, None, LogPosition::ZERO),
        )
        .await
        .unwrap();

    let rows = destination
        .wait_for_rows("users", expected_rows(2..=2, "v0"))
        .await;

    let mut config = test_config(vec![test_table_config("users")], 4);
    config.resume_position = Some(skipped.0);
    let mut pipeline = create_pipeline(config, &source, &destination, &store);
    pipeline.start().await.unwrap();
    rows.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(destination.deliveries().await.len(), 1);
}
