use serde::Serialize;

use crate::types::{LogPosition, PrimaryKey, TableName, TableRow, Watermark};

/// Kind of a row mutation in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row mutation read from the change log.
///
/// `row` holds the new values for inserts and updates and is `None` for deletes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub table: TableName,
    pub key: PrimaryKey,
    pub row: Option<TableRow>,
    pub position: LogPosition,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn is_delete(&self) -> bool {
        matches!(self.kind, ChangeKind::Delete)
    }
}

/// An entry of the ordered change log, either a row mutation or an injected marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    Change(ChangeEvent),
    Marker(Watermark),
}

impl LogEntry {
    pub fn position(&self) -> LogPosition {
        match self {
            LogEntry::Change(event) => event.position,
            LogEntry::Marker(watermark) => watermark.position,
        }
    }

    pub fn table(&self) -> &TableName {
        match self {
            LogEntry::Change(event) => &event.table,
            LogEntry::Marker(watermark) => &watermark.signal.table,
        }
    }
}
