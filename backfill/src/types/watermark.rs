use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::types::{ChunkId, LogPosition, TableName};

/// Unique identifier of a marker, fresh for every chunk attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct WatermarkId(Uuid);

impl WatermarkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WatermarkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WatermarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of a window a marker delimits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkKind {
    Low,
    High,
}

impl fmt::Display for WatermarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkKind::Low => write!(f, "low"),
            WatermarkKind::High => write!(f, "high"),
        }
    }
}

/// Payload written into the change log to delimit a chunk's window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatermarkSignal {
    pub id: WatermarkId,
    pub chunk_id: ChunkId,
    pub table: TableName,
    pub kind: WatermarkKind,
}

impl WatermarkSignal {
    pub fn low(table: TableName, chunk_id: ChunkId) -> Self {
        Self {
            id: WatermarkId::new(),
            chunk_id,
            table,
            kind: WatermarkKind::Low,
        }
    }

    pub fn high(table: TableName, chunk_id: ChunkId) -> Self {
        Self {
            id: WatermarkId::new(),
            chunk_id,
            table,
            kind: WatermarkKind::High,
        }
    }
}

/// A marker together with the log position the log assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Watermark {
    pub signal: WatermarkSignal,
    pub position: LogPosition,
}
