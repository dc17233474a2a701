use std::collections::HashMap;

use crate::error::BackfillResult;
use crate::state::table::TableProgress;
use crate::types::TableName;

/// Durable storage of per-table backfill progress.
///
/// Implementations must make a stored value visible to every later load, across restarts when
/// the store is persistent.
#[async_trait::async_trait]
pub trait ProgressStore: Send + Sync {
    /// Returns the stored progress of `table`, if any.
    async fn load_progress(&self, table: &TableName) -> BackfillResult<Option<TableProgress>>;

    /// Returns the stored progress of every table.
    async fn load_all_progress(&self) -> BackfillResult<HashMap<TableName, TableProgress>>;

    /// Replaces the stored progress of `table`.
    async fn store_progress(
        &self,
        table: &TableName,
        progress: TableProgress,
    ) -> BackfillResult<()>;
}
