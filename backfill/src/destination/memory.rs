use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bail;
use crate::destination::Destination;
use crate::error::{BackfillResult, ErrorKind};
use crate::types::{Delivery, PrimaryKey, TableName, TableRow};

#[derive(Debug)]
struct Inner {
    batches: Vec<Vec<Delivery>>,
    failing_pushes: usize,
}

/// In-memory destination for testing and development purposes.
///
/// [`MemoryDestination`] records every pushed batch in order and can rebuild the state a
/// key-addressed target would hold after applying them, see [`MemoryDestination::materialized`].
/// All data is held in memory and will be lost when the process terminates.
#[derive(Debug, Clone)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    /// Creates a new empty memory destination.
    pub fn new() -> Self {
        let inner = Inner {
            batches: Vec::new(),
            failing_pushes: 0,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns a copy of every pushed batch, in push order.
    pub async fn batches(&self) -> Vec<Vec<Delivery>> {
        let inner = self.inner.lock().await;
        inner.batches.clone()
    }

    /// Returns a copy of every delivery, in push order.
    pub async fn deliveries(&self) -> Vec<Delivery> {
        let inner = self.inner.lock().await;
        inner.batches.iter().flatten().cloned().collect()
    }

    /// Returns the rows of `table` after applying every delivery in push order.
    ///
    /// Merged rows and inserts or updates upsert their key, deletes remove it. This is the state a
    /// target applying deliveries idempotently by key would converge to.
    pub async fn materialized(&self, table: &TableName) -> BTreeMap<PrimaryKey, TableRow> {
        let inner = self.inner.lock().await;

        let mut rows = BTreeMap::new();
        for delivery in inner.batches.iter().flatten() {
            if delivery.table() != table {
                continue;
            }

            match delivery {
                Delivery::Row { row, .. } => {
                    rows.insert(row.key.clone(), row.row.clone());
                }
                Delivery::Change(event) => match &event.row {
                    Some(row) if !event.is_delete() => {
                        rows.insert(event.key.clone(), row.clone());
                    }
                    _ => {
                        rows.remove(&event.key);
                    }
                },
            }
        }

        rows
    }

    /// Makes the next `count` pushes fail with [`ErrorKind::DestinationPushFailed`].
    pub async fn fail_next_pushes(&self, count: usize) {
        let mut inner = self.inner.lock().await;
        inner.failing_pushes += count;
    }

    /// Clears all stored batches.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.batches.clear();
    }
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Destination for MemoryDestination {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn push(&self, batch: Vec<Delivery>) -> BackfillResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.failing_pushes > 0 {
            inner.failing_pushes -= 1;
            bail!(
                ErrorKind::DestinationPushFailed,
                "Push to memory destination failed",
                format!("Injected failure pushing {} deliveries", batch.len())
            );
        }

        debug!(deliveries = batch.len(), "pushing batch to memory destination");

        inner.batches.push(batch);

        Ok(())
    }

    async fn shutdown(&self) -> BackfillResult<()> {
        let inner = self.inner.lock().await;
        info!(
            batches = inner.batches.len(),
            "memory destination shutting down"
        );

        Ok(())
    }
}
