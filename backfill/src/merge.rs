//! Reconciliation of a chunk's snapshot read with the changes buffered inside its window.

use std::collections::BTreeMap;

use crate::types::{KeyRange, MergedRow, PrimaryKey, RowOrigin, SnapshotRow};
use crate::watermark::buffer::ChunkBuffer;

/// Merges `snapshot` with `buffer` into the rows a chunk emits, in ascending key order.
///
/// For every key of `range` the buffered change wins over the snapshot row; a buffered delete
/// removes the key from the output. Snapshot rows and buffered changes outside of `range` are
/// ignored, they belong to another chunk or to streaming. The function is pure: identical inputs
/// always produce identical output.
pub fn merge_chunk(
    range: &KeyRange,
    snapshot: &[SnapshotRow],
    buffer: &ChunkBuffer,
) -> Vec<MergedRow> {
    let mut merged: BTreeMap<PrimaryKey, MergedRow> = snapshot
        .iter()
        .filter(|row| range.contains(&row.key))
        .map(|row| {
            let merged_row = MergedRow {
                key: row.key.clone(),
                row: row.row.clone(),
                origin: RowOrigin::Snapshot,
            };
            (row.key.clone(), merged_row)
        })
        .collect();

    for event in buffer.iter().filter(|event| range.contains(&event.key)) {
        match &event.row {
            Some(row) if !event.is_delete() => {
                let merged_row = MergedRow {
                    key: event.key.clone(),
                    row: row.clone(),
                    origin: RowOrigin::Log {
                        position: event.position,
                        kind: event.kind,
                    },
                };
                merged.insert(event.key.clone(), merged_row);
            }
            _ => {
                merged.remove(&event.key);
            }
        }
    }

    merged.into_values().collect()
}
