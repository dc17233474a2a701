use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

use crate::error::BackfillResult;
use crate::types::{
    KeyRange, LogEntry, LogPosition, PrimaryKey, SnapshotRow, TableBounds, TableName,
    WatermarkSignal,
};

/// Lazy sequence of log entries, in strictly increasing position order.
pub type LogStream = BoxStream<'static, BackfillResult<LogEntry>>;

/// Storage collaborator used for bounds discovery and point-in-time chunk reads.
///
/// Read isolation of [`TableStorage::read_chunk`] is the storage's concern. Implementations
/// must return rows in ascending key order; a violation is reported as a corrupt chunk.
#[async_trait::async_trait]
pub trait TableStorage: Send + Sync {
    /// Returns the key-space descriptor of `table`, or `None` when the table has no rows.
    async fn table_bounds(&self, table: &TableName) -> BackfillResult<Option<TableBounds>>;

    /// Returns up to `limit` keys strictly greater than `after`, in ascending order.
    async fn scan_keys(
        &self,
        table: &TableName,
        after: Option<&PrimaryKey>,
        limit: usize,
    ) -> BackfillResult<Vec<PrimaryKey>>;

    /// Reads all rows of `table` whose key falls in `range`, in ascending key order.
    async fn read_chunk(
        &self,
        table: &TableName,
        range: &KeyRange,
    ) -> BackfillResult<Vec<SnapshotRow>>;
}

/// Ordered change log collaborator.
///
/// Markers written through [`ChangeLog::insert_marker`] land in the same log that
/// [`ChangeLog::stream_from`] reads, ordered with respect to concurrent row mutations.
#[async_trait::async_trait]
pub trait ChangeLog: Send + Sync {
    /// Returns the position of the last entry currently in the log.
    async fn head_position(&self) -> BackfillResult<LogPosition>;

    /// Opens a stream of every entry with a position strictly greater than `position`.
    ///
    /// Streams can be reopened from any previously observed position without gaps.
    async fn stream_from(&self, position: LogPosition) -> BackfillResult<LogStream>;

    /// Appends a marker to the log and returns the position assigned to it.
    async fn insert_marker(&self, signal: &WatermarkSignal) -> BackfillResult<LogPosition>;
}

/// Pair of collaborators describing one source.
#[derive(Clone)]
pub struct SourceHandle {
    pub storage: Arc<dyn TableStorage>,
    pub log: Arc<dyn ChangeLog>,
}

impl SourceHandle {
    pub fn new(storage: Arc<dyn TableStorage>, log: Arc<dyn ChangeLog>) -> Self {
        Self { storage, log }
    }

    /// Builds a handle from a source implementing both collaborator traits.
    pub fn from_source<S>(source: S) -> Self
    where
        S: TableStorage + ChangeLog + 'static,
    {
        let source = Arc::new(source);
        Self {
            storage: source.clone(),
            log: source,
        }
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle").finish_non_exhaustive()
    }
}
