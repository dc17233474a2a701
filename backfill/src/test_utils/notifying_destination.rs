use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::destination::Destination;
use crate::destination::memory::MemoryDestination;
use crate::error::BackfillResult;
use crate::test_utils::notify::TimedNotify;
use crate::types::{Delivery, PrimaryKey, TableName, TableRow};

type RowsCondition = Box<dyn Fn(&BTreeMap<PrimaryKey, TableRow>) -> bool + Send + Sync>;

struct Inner {
    conditions: Vec<(TableName, RowsCondition, Arc<Notify>)>,
    shutdown_called: bool,
}

/// Destination recording every delivery in a [`MemoryDestination`] and notifying waiters once the
/// materialized rows of a table satisfy a condition.
#[derive(Clone)]
pub struct NotifyingDestination {
    destination: MemoryDestination,
    inner: Arc<Mutex<Inner>>,
}

impl NotifyingDestination {
    pub fn new() -> Self {
        Self::wrap(MemoryDestination::new())
    }

    pub fn wrap(destination: MemoryDestination) -> Self {
        let inner = Inner {
            conditions: Vec::new(),
            shutdown_called: false,
        };

        Self {
            destination,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns the wrapped destination.
    pub fn memory(&self) -> &MemoryDestination {
        &self.destination
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.destination.deliveries().await
    }

    pub async fn materialized(&self, table: &TableName) -> BTreeMap<PrimaryKey, TableRow> {
        self.destination.materialized(table).await
    }

    /// Registers a notification fired once the materialized rows of `table` satisfy `condition`.
    pub async fn notify_on_rows<F>(&self, table: impl Into<TableName>, condition: F) -> TimedNotify
    where
        F: Fn(&BTreeMap<PrimaryKey, TableRow>) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.lock().await;
        inner
            .conditions
            .push((table.into(), Box::new(condition), notify.clone()));

        // The condition might already hold.
        self.check_conditions(&mut inner).await;

        TimedNotify::new(notify)
    }

    /// Registers a notification fired once the materialized rows of `table` equal `expected`.
    pub async fn wait_for_rows(
        &self,
        table: impl Into<TableName>,
        expected: BTreeMap<PrimaryKey, TableRow>,
    ) -> TimedNotify {
        self.notify_on_rows(table, move |rows| rows == &expected)
            .await
    }

    pub async fn shutdown_called(&self) -> bool {
        self.inner.lock().await.shutdown_called
    }

    async fn check_conditions(&self, inner: &mut Inner) {
        let mut satisfied = Vec::new();
        for (index, (table, condition, notify)) in inner.conditions.iter().enumerate() {
            let rows = self.destination.materialized(table).await;
            if condition(&rows) {
                notify.notify_one();
                satisfied.push(index);
            }
        }

        for index in satisfied.into_iter().rev() {
            inner.conditions.remove(index);
        }
    }
}

impl Default for NotifyingDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotifyingDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyingDestination")
            .field("destination", &self.destination)
            .finish()
    }
}

#[async_trait::async_trait]
impl Destination for NotifyingDestination {
    fn name(&self) -> &'static str {
        "notifying"
    }

    async fn push(&self, batch: Vec<Delivery>) -> BackfillResult<()> {
        let mut inner = self.inner.lock().await;
        self.destination.push(batch).await?;
        self.check_conditions(&mut inner).await;

        Ok(())
    }

    async fn shutdown(&self) -> BackfillResult<()> {
        let mut inner = self.inner.lock().await;
        inner.shutdown_called = true;

        Ok(())
    }
}
