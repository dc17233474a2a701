use std::fmt;

use crate::types::{LogPosition, PrimaryKey};

/// Phase of a table's backfill as persisted in the progress store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TablePhase {
    /// Chunks are still being processed.
    Snapshotting,
    /// Every chunk completed; the table only streams changes.
    Streaming,
}

impl fmt::Display for TablePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TablePhase::Snapshotting => write!(f, "snapshotting"),
            TablePhase::Streaming => write!(f, "streaming"),
        }
    }
}

/// Durable progress of one table.
///
/// Stored after every completed chunk and after every acknowledged batch of streamed changes.
/// On restart a table resumes from it: chunks up to `last_key` are not read again and the
/// tailer restarts from `position`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableProgress {
    pub phase: TablePhase,
    /// Upper bound of the last completed chunk, `None` before the first chunk completes.
    pub last_key: Option<PrimaryKey>,
    /// Maximum key captured when the backfill started, `None` for tables that were empty.
    pub snapshot_max: Option<PrimaryKey>,
    /// Log position up to which every change was delivered or covered by a merged chunk.
    pub position: LogPosition,
}

impl TableProgress {
    pub fn snapshotting(
        last_key: Option<PrimaryKey>,
        snapshot_max: PrimaryKey,
        position: LogPosition,
    ) -> Self {
        Self {
            phase: TablePhase::Snapshotting,
            last_key,
            snapshot_max: Some(snapshot_max),
            position,
        }
    }

    pub fn streaming(
        last_key: Option<PrimaryKey>,
        snapshot_max: Option<PrimaryKey>,
        position: LogPosition,
    ) -> Self {
        Self {
            phase: TablePhase::Streaming,
            last_key,
            snapshot_max,
            position,
        }
    }
}
