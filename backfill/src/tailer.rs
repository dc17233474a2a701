//! Continuous reader of a table's entries in the ordered change log.

use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{BackfillResult, ErrorKind};
use crate::source::{ChangeLog, LogStream};
use crate::types::{LogEntry, LogPosition, TableName};
use crate::watermark::router::WindowRouter;

/// Reads the change log from a resumable position and yields the entries of one table.
///
/// Entries of other tables advance the position but are not returned. Entries at or below the
/// current position are skipped, so a stream reopened from an acknowledged position never
/// produces an entry twice through the same tailer.
pub struct ChangeLogTailer {
    table: TableName,
    stream: LogStream,
    position: LogPosition,
}

impl ChangeLogTailer {
    /// Opens the log right after `position`.
    pub async fn start(
        log: &dyn ChangeLog,
        table: TableName,
        position: LogPosition,
    ) -> BackfillResult<Self> {
        let stream = log.stream_from(position).await?;

        debug!(%table, %position, "tailer started");

        Ok(Self {
            table,
            stream,
            position,
        })
    }

    /// Waits up to `wait` for the next entry of the table.
    ///
    /// Returns `Ok(None)` when nothing arrived in time and fails with
    /// [`ErrorKind::TailerStopped`] once the underlying stream ends.
    pub async fn next(&mut self, wait: Duration) -> BackfillResult<Option<LogEntry>> {
        loop {
            let entry = match timeout(wait, self.stream.next()).await {
                Err(_) => return Ok(None),
                Ok(None) => {
                    bail!(
                        ErrorKind::TailerStopped,
                        "Change log stream ended",
                        format!(
                            "The change log stream of table '{}' ended at position {}",
                            self.table, self.position
                        )
                    );
                }
                Ok(Some(entry)) => entry?,
            };

            let position = entry.position();
            if position <= self.position {
                continue;
            }
            self.position = position;

            if entry.table() == &self.table {
                return Ok(Some(entry));
            }
        }
    }

    /// Returns the position of the last entry read from the log.
    pub fn current_position(&self) -> LogPosition {
        self.position
    }
}

/// Spawns the task feeding `router` from `tailer` until shutdown or until the tailer fails.
///
/// A failure is recorded on the router so that the chunk driver can restart the tailer.
pub fn spawn_tailer(
    mut tailer: ChangeLogTailer,
    router: WindowRouter,
    mut shutdown_rx: ShutdownRx,
    idle_wait: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!(table = %tailer.table, "tailer stopped due to shutdown");
                    return;
                }
                result = tailer.next(idle_wait) => match result {
                    Ok(Some(entry)) => router.observe(entry).await,
                    Ok(None) => router.observe_idle(tailer.current_position()).await,
                    Err(err) => {
                        warn!(
                            table = %tailer.table,
                            position = %tailer.current_position(),
                            error = %err,
                            "tailer failed",
                        );
                        router.fail(err).await;
                        return;
                    }
                },
            }
        }
    })
}
