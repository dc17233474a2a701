use config::shared::{BackfillConfig, TableConfig};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use crate::source::memory::MemorySource;
use crate::types::{Cell, KeyValue, PrimaryKey, TableRow};

/// Returns a single-column row holding `value`.
pub fn row(value: &str) -> TableRow {
    TableRow::new(vec![Cell::from(value)])
}

pub fn key(value: i64) -> PrimaryKey {
    PrimaryKey::from(value)
}

/// Returns a two-column key made of a tenant and an id.
pub fn tenant_key(tenant: &str, id: i64) -> PrimaryKey {
    PrimaryKey::new(vec![KeyValue::Text(tenant.to_string()), KeyValue::Int(id)])
}

/// Loads `keys` into `table` with `value` as their row, without writing to the change log.
pub fn seed_table(source: &MemorySource, table: &str, keys: RangeInclusive<i64>, value: &str) {
    source.create_table(table);
    source.load_rows(table, keys.map(|k| (key(k), row(value))));
}

/// Returns the rows of a table seeded with `keys` holding `value`.
pub fn expected_rows(keys: RangeInclusive<i64>, value: &str) -> BTreeMap<PrimaryKey, TableRow> {
    keys.map(|k| (key(k), row(value))).collect()
}

/// Returns a table keyed by a single `id` column.
pub fn test_table_config(name: &str) -> TableConfig {
    TableConfig {
        name: name.to_string(),
        key_columns: vec!["id".to_string()],
        identity_columns: None,
    }
}

/// Returns a configuration with small chunks and short delays, suited to tests.
pub fn test_config(tables: Vec<TableConfig>, chunk_size: usize) -> BackfillConfig {
    let mut config = BackfillConfig::with_tables(tables);
    config.chunk_size = chunk_size;
    config.marker_timeout_ms = 2_000;
    config.retry.max_attempts = 5;
    config.retry.initial_delay_ms = 10;
    config.retry.max_delay_ms = 100;
    config.batch.max_size = 100;
    config.batch.max_fill_ms = 20;
    config.sink_push_attempts = 2;

    config
}
