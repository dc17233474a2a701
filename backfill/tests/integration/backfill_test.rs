use backfill::state::table::TablePhase;
use backfill::store::ProgressStore;
use backfill::test_utils::notifying_destination::NotifyingDestination;
use backfill::test_utils::notifying_store::NotifyingProgressStore;
use backfill::test_utils::pipeline::create_pipeline;
use backfill::test_utils::table::{
    expected_rows, key, row, seed_table, tenant_key, test_config, test_table_config,
};
use backfill::types::{Delivery, KeyValue, PrimaryKey, RowOrigin, TableName};
use backfill::source::memory::MemorySource;
use config::shared::TableConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use telemetry::tracing::init_test_tracing;

fn merged_rows(deliveries: &[Delivery]) -> Vec<(u64, PrimaryKey, RowOrigin)> {
    deliveries
        .iter()
        .filter_map(|delivery| match delivery {
            Delivery::Row { chunk_id, row, .. } => {
                Some((chunk_id.0, row.key.clone(), row.origin))
            }
            Delivery::Change(_) => None,
        })
        .collect()
}

fn streamed_keys(deliveries: &[Delivery]) -> Vec<PrimaryKey> {
    deliveries
        .iter()
        .filter_map(|delivery| match delivery {
            Delivery::Change(event) => Some(event.key.clone()),
            Delivery::Row { .. } => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn full_backfill_matches_source() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=20, "v0");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    let streaming = store
        .notify_on_progress("users", |progress| progress.phase == TablePhase::Streaming)
        .await;
    let rows = destination
        .wait_for_rows("users", expected_rows(1..=20, "v0"))
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

    // Every key is emitted exactly once, in ascending order, four chunks of five keys.
    let merged = merged_rows(&destination.deliveries().await);
    let keys: Vec<_> = merged.iter().map(|(_, key, _)| key.clone()).collect();
    assert_eq!(keys, (1..=20).map(key).collect::<Vec<_>>());
    assert!(
        merged
            .iter()
            .all(|(_, _, origin)| *origin == RowOrigin::Snapshot)
    );

    let chunks: HashSet<_> = merged.iter().map(|(chunk_id, _, _)| *chunk_id).collect();
    assert_eq!(chunks.len(), 4);

    let progress = store
        .load_progress(&TableName::from("users"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.phase, TablePhase::Streaming);
    assert_eq!(progress.last_key, Some(key(20)));
    assert_eq!(progress.snapshot_max, Some(key(20)));

    assert!(destination.shutdown_called().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn progress_is_stored_after_every_chunk() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=20, "v0");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

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
    pipeline.shutdown_and_wait().await.unwrap();

    let history = store.memory().history(&TableName::from("users")).await;
    let snapshot_keys: Vec<_> = history
        .iter()
        .filter(|progress| progress.phase == TablePhase::Snapshotting)
        .map(|progress| progress.last_key.clone())
        .collect();

    assert_eq!(
        snapshot_keys,
        vec![None, Some(key(5)), Some(key(10)), Some(key(15)), Some(key(20))]
    );

    // Acknowledged positions never move backwards.
    assert!(
        history
            .windows(2)
            .all(|pair| pair[0].position <= pair[1].position)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn update_inside_window_wins_over_snapshot() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=20, "v0");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    let writer = source.clone();
    source.after_next_chunk_read(move || writer.update("users", 3i64, row("v1")));

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
    pipeline.shutdown_and_wait().await.unwrap();

    let merged = merged_rows(&destination.deliveries().await);
    let first_chunk: Vec<_> = merged
        .iter()
        .filter(|(chunk_id, _, _)| *chunk_id == 0)
        .collect();
    assert_eq!(first_chunk.len(), 5);

    let (_, _, origin) = first_chunk
        .iter()
        .find(|(_, key_value, _)| *key_value == key(3))
        .unwrap();
    assert!(matches!(origin, RowOrigin::Log { .. }));

    // The update was merged into the chunk, not streamed.
    assert!(streamed_keys(&destination.deliveries().await).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_inside_window_is_omitted() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=20, "v0");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    let writer = source.clone();
    source.after_next_chunk_read(move || writer.delete("users", 4i64));

    let mut expected = expected_rows(1..=20, "v0");
    expected.remove(&key(4));
    let rows = destination.wait_for_rows("users", expected).await;

    let mut pipeline = create_pipeline(
        test_config(vec![test_table_config("users")], 5),
        &source,
        &destination,
        &store,
    );
    pipeline.start().await.unwrap();
    rows.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    let merged = merged_rows(&destination.deliveries().await);
    assert!(merged.iter().all(|(_, key_value, _)| *key_value != key(4)));
    assert_eq!(merged.len(), 19);
}

#[tokio::test(flavor = "multi_thread")]
async fn insert_beyond_table_maximum_is_streamed() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=20, "v0");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    let writer = source.clone();
    source.after_next_chunk_read(move || writer.insert("users", 21i64, row("v1")));

    let mut expected = expected_rows(1..=20, "v0");
    expected.insert(key(21), row("v1"));
    let rows = destination.wait_for_rows("users", expected).await;

    let mut pipeline = create_pipeline(
        test_config(vec![test_table_config("users")], 5),
        &source,
        &destination,
        &store,
    );
    pipeline.start().await.unwrap();
    rows.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    let deliveries = destination.deliveries().await;
    assert_eq!(streamed_keys(&deliveries), vec![key(21)]);
    assert!(
        merged_rows(&deliveries)
            .iter()
            .all(|(_, key_value, _)| *key_value != key(21))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_writer_converges_to_source() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=200, "v0");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    let mut pipeline = create_pipeline(
        test_config(vec![test_table_config("users")], 10),
        &source,
        &destination,
        &store,
    );
    pipeline.start().await.unwrap();

    let writer = tokio::spawn({
        let source = source.clone();
        async move {
            let mut rng = StdRng::seed_from_u64(42);
            for operation in 0..500 {
                let k: i64 = rng.gen_range(1..=250);
                match rng.gen_range(0..3) {
                    0 => source.delete("users", k),
                    _ => source.update("users", k, row(&format!("w{operation}"))),
                }

                if operation % 10 == 0 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        }
    });
    writer.await.unwrap();

    let expected = source.rows(&TableName::from("users"));
    destination.wait_for_rows("users", expected).await.notified().await;

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_table_streams_changes() {
    init_test_tracing();

    let source = MemorySource::new();
    source.create_table("users");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

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

    let rows = destination
        .wait_for_rows("users", expected_rows(1..=2, "v1"))
        .await;
    source.insert("users", 1i64, row("v1"));
    source.insert("users", 2i64, row("v1"));
    rows.notified().await;

    pipeline.shutdown_and_wait().await.unwrap();

    let deliveries = destination.deliveries().await;
    assert!(merged_rows(&deliveries).is_empty());
    assert_eq!(streamed_keys(&deliveries), vec![key(1), key(2)]);

    // An empty table never writes markers.
    assert!(
        source
            .log_entries()
            .iter()
            .all(|entry| matches!(entry, backfill::types::LogEntry::Change(_)))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn multiple_tables_are_backfilled_independently() {
    init_test_tracing();

    let source = MemorySource::new();
    seed_table(&source, "users", 1..=20, "v0");
    seed_table(&source, "orders", 1..=7, "o0");
    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();

    let users = destination
        .wait_for_rows("users", expected_rows(1..=20, "v0"))
        .await;
    let orders = destination
        .wait_for_rows("orders", expected_rows(1..=7, "o0"))
        .await;
    let users_streaming = store
        .notify_on_progress("users", |progress| progress.phase == TablePhase::Streaming)
        .await;
    let orders_streaming = store
        .notify_on_progress("orders", |progress| progress.phase == TablePhase::Streaming)
        .await;

    let mut pipeline = create_pipeline(
        test_config(
            vec![test_table_config("users"), test_table_config("orders")],
            3,
        ),
        &source,
        &destination,
        &store,
    );
    pipeline.start().await.unwrap();

    users.notified().await;
    orders.notified().await;
    users_streaming.notified().await;
    orders_streaming.notified().await;

    let handles: Vec<_> = pipeline
        .arena()
        .iter()
        .map(|(handle, descriptor)| (handle, descriptor.name.clone()))
        .collect();
    for (handle, name) in handles {
        let state = pipeline.worker_state(handle).await.unwrap();
        let state = state.lock().await;

        let expected_last_key = if name.as_str() == "users" { 20 } else { 7 };
        assert_eq!(state.last_key(), Some(&key(expected_last_key)));
        assert_eq!(state.phase(), Some(TablePhase::Streaming));
    }

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn identity_groups_are_never_split() {
    init_test_tracing();

    let source = MemorySource::new();
    source.create_table("events");
    let mut expected = BTreeMap::new();
    for (tenant, count) in [("a", 4), ("b", 4), ("c", 2)] {
        for id in 1..=count {
            source.load_rows("events", [(tenant_key(tenant, id), row("v0"))]);
            expected.insert(tenant_key(tenant, id), row("v0"));
        }
    }

    let destination = NotifyingDestination::new();
    let store = NotifyingProgressStore::new();
    let rows = destination.wait_for_rows("events", expected).await;

    let table = TableConfig {
        name: "events".to_string(),
        key_columns: vec!["tenant_id".to_string(), "id".to_string()],
        identity_columns: Some(vec!["tenant_id".to_string()]),
    };
    let mut pipeline = create_pipeline(test_config(vec![table], 3), &source, &destination, &store);
    pipeline.start().await.unwrap();
    rows.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    let mut chunks_by_tenant: HashMap<KeyValue, HashSet<u64>> = HashMap::new();
    for (chunk_id, key_value, _) in merged_rows(&destination.deliveries().await) {
        chunks_by_tenant
            .entry(key_value.values()[0].clone())
            .or_default()
            .insert(chunk_id);
    }

    assert_eq!(chunks_by_tenant.len(), 3);
    assert!(chunks_by_tenant.values().all(|chunks| chunks.len() == 1));
}
