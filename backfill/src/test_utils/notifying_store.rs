use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::error::BackfillResult;
use crate::state::table::TableProgress;
use crate::store::ProgressStore;
use crate::store::memory::MemoryProgressStore;
use crate::test_utils::notify::TimedNotify;
use crate::types::TableName;

type ProgressCondition = Box<dyn Fn(&TableProgress) -> bool + Send + Sync>;

/// Progress store notifying waiters once the stored progress of a table satisfies a condition.
#[derive(Clone, Default)]
pub struct NotifyingProgressStore {
    store: MemoryProgressStore,
    conditions: Arc<Mutex<Vec<(TableName, ProgressCondition, Arc<Notify>)>>>,
}

impl NotifyingProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the wrapped store.
    pub fn memory(&self) -> &MemoryProgressStore {
        &self.store
    }

    /// Registers a notification fired once the progress stored for `table` satisfies
    /// `condition`.
    pub async fn notify_on_progress<F>(
        &self,
        table: impl Into<TableName>,
        condition: F,
    ) -> TimedNotify
    where
        F: Fn(&TableProgress) -> bool + Send + Sync + 'static,
    {
        let table = table.into();
        let notify = Arc::new(Notify::new());

        let mut conditions = self.conditions.lock().await;
        let current = self.store.load_progress(&table).await.ok().flatten();
        if current.as_ref().is_some_and(&condition) {
            notify.notify_one();
        } else {
            conditions.push((table, Box::new(condition), notify.clone()));
        }

        TimedNotify::new(notify)
    }
}

impl fmt::Debug for NotifyingProgressStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyingProgressStore")
            .field("store", &self.store)
            .finish()
    }
}

#[async_trait::async_trait]
impl ProgressStore for NotifyingProgressStore {
    async fn load_progress(&self, table: &TableName) -> BackfillResult<Option<TableProgress>> {
        self.store.load_progress(table).await
    }

    async fn load_all_progress(&self) -> BackfillResult<HashMap<TableName, TableProgress>> {
        self.store.load_all_progress().await
    }

    async fn store_progress(
        &self,
        table: &TableName,
        progress: TableProgress,
    ) -> BackfillResult<()> {
        let mut conditions = self.conditions.lock().await;
        self.store.store_progress(table, progress.clone()).await?;

        conditions.retain(|(condition_table, condition, notify)| {
            let satisfied = condition_table == table && condition(&progress);
            if satisfied {
                notify.notify_one();
            }

            !satisfied
        });

        Ok(())
    }
}
