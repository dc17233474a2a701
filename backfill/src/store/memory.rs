use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::BackfillResult;
use crate::state::table::TableProgress;
use crate::store::ProgressStore;
use crate::types::TableName;

#[derive(Debug, Default)]
struct Inner {
    progress: HashMap<TableName, TableProgress>,
    history: HashMap<TableName, Vec<TableProgress>>,
}

/// In-memory progress store.
///
/// Keeps every stored value per table in addition to the latest one, which lets tests check how
/// a table progressed. Cloning shares the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryProgressStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every value stored for `table`, oldest first.
    pub async fn history(&self, table: &TableName) -> Vec<TableProgress> {
        let inner = self.inner.lock().await;
        inner.history.get(table).cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load_progress(&self, table: &TableName) -> BackfillResult<Option<TableProgress>> {
        let inner = self.inner.lock().await;
        Ok(inner.progress.get(table).cloned())
    }

    async fn load_all_progress(&self) -> BackfillResult<HashMap<TableName, TableProgress>> {
        let inner = self.inner.lock().await;
        Ok(inner.progress.clone())
    }

    async fn store_progress(
        &self,
        table: &TableName,
        progress: TableProgress,
    ) -> BackfillResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .history
            .entry(table.clone())
            .or_default()
            .push(progress.clone());
        inner.progress.insert(table.clone(), progress);

        Ok(())
    }
}
