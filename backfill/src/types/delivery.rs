use serde::Serialize;

use crate::types::{ChangeEvent, ChangeKind, ChunkId, LogPosition, PrimaryKey, TableName, TableRow};

/// A row as returned by a chunk's point-in-time read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRow {
    pub key: PrimaryKey,
    pub row: TableRow,
}

impl SnapshotRow {
    pub fn new(key: PrimaryKey, row: TableRow) -> Self {
        Self { key, row }
    }
}

/// Where the value of a merged row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOrigin {
    Snapshot,
    Log {
        position: LogPosition,
        kind: ChangeKind,
    },
}

/// A row produced by merging a chunk's snapshot with its window buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRow {
    pub key: PrimaryKey,
    pub row: TableRow,
    pub origin: RowOrigin,
}

/// A single item handed to a destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delivery {
    /// A row emitted by a completed chunk.
    Row {
        table: TableName,
        chunk_id: ChunkId,
        row: MergedRow,
    },
    /// A change streamed outside of any active window.
    Change(ChangeEvent),
}

impl Delivery {
    pub fn table(&self) -> &TableName {
        match self {
            Delivery::Row { table, .. } => table,
            Delivery::Change(event) => &event.table,
        }
    }
}
