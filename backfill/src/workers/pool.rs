use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::arena::TableHandle;
use crate::backfill_error;
use crate::error::{BackfillResult, ErrorKind};
use crate::workers::table::TableWorkerState;

/// Handle of a worker spawned in the pool.
#[derive(Debug)]
struct TableWorkerHandle {
    state: TableWorkerState,
    abort_handle: AbortHandle,
}

impl TableWorkerHandle {
    fn is_finished(&self) -> bool {
        self.abort_handle.is_finished()
    }
}

/// Internal state for [`TableWorkerPool`].
#[derive(Debug)]
pub struct TableWorkerPoolInner {
    /// Currently active table workers indexed by table handle.
    active: HashMap<TableHandle, TableWorkerHandle>,
    /// Owns all spawned worker tasks.
    join_set: JoinSet<(TableHandle, BackfillResult<()>)>,
}

impl TableWorkerPoolInner {
    fn new() -> Self {
        Self {
            active: HashMap::new(),
            join_set: JoinSet::new(),
        }
    }

    /// Spawns and inserts a worker into the pool.
    ///
    /// If a worker for the table already exists and is still running, logs a warning and skips
    /// insertion.
    pub fn spawn<F>(&mut self, handle: TableHandle, state: TableWorkerState, future: F)
    where
        F: Future<Output = BackfillResult<()>> + Send + 'static,
    {
        match self.active.entry(handle) {
            Entry::Occupied(entry) if !entry.get().is_finished() => {
                warn!(table = %handle, "worker already exists in pool and is still running");
            }
            entry => {
                let abort_handle = self.join_set.spawn(async move {
                    let result = future.await;
                    (handle, result)
                });

                let worker = TableWorkerHandle {
                    state,
                    abort_handle,
                };
                match entry {
                    Entry::Occupied(mut entry) => {
                        entry.insert(worker);
                        debug!(table = %handle, "replaced finished worker in pool");
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(worker);
                        debug!(table = %handle, "spawned worker in pool");
                    }
                }
            }
        }
    }

    /// Retrieves the state of an active worker.
    ///
    /// Returns `None` if no worker exists for the table or if the worker has finished.
    pub fn get_active_worker_state(&self, handle: TableHandle) -> Option<TableWorkerState> {
        let worker = self.active.get(&handle)?;
        if worker.is_finished() {
            return None;
        }

        Some(worker.state.clone())
    }

    /// Checks if an active worker exists for the given table.
    pub fn has_active_worker(&self, handle: TableHandle) -> bool {
        self.active
            .get(&handle)
            .is_some_and(|worker| !worker.is_finished())
    }
}

/// Pool running one backfill worker per table.
///
/// Tables are independent: a failing table does not stop the others, its error is collected and
/// returned by [`TableWorkerPool::wait_all`] together with the errors of other failed tables.
#[derive(Debug, Clone)]
pub struct TableWorkerPool {
    inner: Arc<Mutex<TableWorkerPoolInner>>,
}

impl TableWorkerPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TableWorkerPoolInner::new())),
        }
    }

    /// Waits for all table workers to complete.
    ///
    /// Errors of all failed workers are aggregated into a single error; a panicking worker is
    /// reported as [`ErrorKind::TableWorkerPanic`].
    pub async fn wait_all(&self) -> BackfillResult<()> {
        let mut errors = Vec::new();

        loop {
            let result = {
                let mut inner = self.inner.lock().await;
                inner.join_set.join_next().await
            };

            let Some(result) = result else {
                // JoinSet is empty, all workers have completed.
                break;
            };

            match result {
                Ok((handle, worker_result)) => {
                    let mut inner = self.inner.lock().await;
                    inner.active.remove(&handle);

                    if let Err(err) = worker_result {
                        error!(table = %handle, error = %err, "worker completed with error");
                        errors.push(err);
                    }
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        debug!("worker task was cancelled");
                    } else {
                        errors.push(backfill_error!(
                            ErrorKind::TableWorkerPanic,
                            "Table worker panicked",
                            join_err
                        ));
                    }
                }
            }
        }

        {
            let mut inner = self.inner.lock().await;
            inner.active.clear();
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

impl Default for TableWorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TableWorkerPool {
    type Target = Mutex<TableWorkerPoolInner>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
