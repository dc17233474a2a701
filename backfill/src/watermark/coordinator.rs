use metrics::{counter, histogram};
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownRx, is_shutdown_requested};
use crate::destination::sink::DeliverySink;
use crate::error::{BackfillResult, ErrorKind};
#[cfg(feature = "failpoints")]
use crate::failpoints::{CHUNK_BEFORE_HIGH_MARKER, CHUNK_BEFORE_MERGE, chunk_fail_point};
use crate::merge::merge_chunk;
use crate::metrics::{
    BACKFILL_CHUNK_DURATION_SECONDS, BACKFILL_CHUNKS_COMPLETED_TOTAL,
    BACKFILL_EVENTS_STREAMED_TOTAL, BACKFILL_ROWS_EMITTED_TOTAL, TABLE_NAME_LABEL,
};
use crate::source::SourceHandle;
use crate::types::{
    ChangeEvent, ChunkId, Delivery, KeyRange, LogPosition, SnapshotRow, TableName,
    WatermarkSignal,
};
use crate::watermark::router::{ClosedWindow, Routed, WindowRouter};
use crate::workers::table::TableWorkerState;

/// Phase of the chunk attempt currently driven by a [`WatermarkCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkPhase {
    Idle,
    LowSent,
    ReadingSnapshot,
    HighSent,
    Watching,
    Merging,
    Done,
}

impl fmt::Display for ChunkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkPhase::Idle => write!(f, "idle"),
            ChunkPhase::LowSent => write!(f, "low_sent"),
            ChunkPhase::ReadingSnapshot => write!(f, "reading_snapshot"),
            ChunkPhase::HighSent => write!(f, "high_sent"),
            ChunkPhase::Watching => write!(f, "watching"),
            ChunkPhase::Merging => write!(f, "merging"),
            ChunkPhase::Done => write!(f, "done"),
        }
    }
}

/// Summary of a chunk whose merged rows were delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedChunk {
    pub chunk_id: ChunkId,
    pub range: KeyRange,
    pub rows_emitted: usize,
    pub events_streamed: usize,
    /// Position of the high marker. Every change up to it was delivered, merged, or belongs to
    /// a chunk that is read later.
    pub acked_position: LogPosition,
}

/// Result of a chunk attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Completed(CompletedChunk),
    /// Shutdown was requested before the chunk completed; the attempt must be discarded.
    Shutdown,
}

/// Drives one chunk at a time through its low marker, snapshot read, high marker and merge.
///
/// The coordinator never observes the log itself. It arms a window on the [`WindowRouter`] fed by
/// the table's tailer and waits until the router reports the high marker, which therefore always
/// comes back through the same ordered stream as the row changes it delimits.
pub struct WatermarkCoordinator {
    table: TableName,
    source: SourceHandle,
    router: WindowRouter,
    sink: DeliverySink,
    state: TableWorkerState,
    marker_timeout: Duration,
    batch_max_size: usize,
}

impl WatermarkCoordinator {
    pub fn new(
        table: TableName,
        source: SourceHandle,
        router: WindowRouter,
        sink: DeliverySink,
        state: TableWorkerState,
        marker_timeout: Duration,
        batch_max_size: usize,
    ) -> Self {
        Self {
            table,
            source,
            router,
            sink,
            state,
            marker_timeout,
            batch_max_size: batch_max_size.max(1),
        }
    }

    /// Runs one attempt of chunk `chunk_id` covering `range`.
    ///
    /// Every error leaves the window armed; the caller discards it through
    /// [`WindowRouter::abort_window`] before retrying the chunk from [`ChunkPhase::Idle`].
    pub async fn process_chunk(
        &self,
        chunk_id: ChunkId,
        range: &KeyRange,
        shutdown_rx: &mut ShutdownRx,
    ) -> BackfillResult<ChunkOutcome> {
        let started = Instant::now();
        self.transition(chunk_id, ChunkPhase::Idle).await;

        if is_shutdown_requested(shutdown_rx) {
            return Ok(ChunkOutcome::Shutdown);
        }

        let low = WatermarkSignal::low(self.table.clone(), chunk_id);
        let high = WatermarkSignal::high(self.table.clone(), chunk_id);
        self.router
            .arm(chunk_id, range.clone(), low.id, high.id)
            .await?;

        let low_position = self.source.log.insert_marker(&low).await?;
        debug!(
            table = %self.table,
            %chunk_id,
            watermark_id = %low.id,
            position = %low_position,
            "low marker written",
        );
        self.transition(chunk_id, ChunkPhase::LowSent).await;

        if is_shutdown_requested(shutdown_rx) {
            return Ok(ChunkOutcome::Shutdown);
        }

        self.transition(chunk_id, ChunkPhase::ReadingSnapshot).await;
        let rows = self.source.storage.read_chunk(&self.table, range).await?;
        self.check_snapshot_rows(range, &rows)?;

        if is_shutdown_requested(shutdown_rx) {
            return Ok(ChunkOutcome::Shutdown);
        }

        #[cfg(feature = "failpoints")]
        chunk_fail_point(CHUNK_BEFORE_HIGH_MARKER, &self.table, chunk_id)?;

        let high_position = self.source.log.insert_marker(&high).await?;
        debug!(
            table = %self.table,
            %chunk_id,
            watermark_id = %high.id,
            position = %high_position,
            "high marker written",
        );
        self.transition(chunk_id, ChunkPhase::HighSent).await;
        self.transition(chunk_id, ChunkPhase::Watching).await;

        let Some((closed, events_streamed)) =
            self.watch_window(chunk_id, &high, shutdown_rx).await?
        else {
            return Ok(ChunkOutcome::Shutdown);
        };

        #[cfg(feature = "failpoints")]
        chunk_fail_point(CHUNK_BEFORE_MERGE, &self.table, chunk_id)?;

        self.transition(chunk_id, ChunkPhase::Merging).await;
        let merged = merge_chunk(range, &rows, &closed.buffer);
        let rows_emitted = merged.len();
        let deliveries = merged
            .into_iter()
            .map(|row| Delivery::Row {
                table: self.table.clone(),
                chunk_id,
                row,
            })
            .collect();
        self.sink.deliver(deliveries).await?;

        self.transition(chunk_id, ChunkPhase::Done).await;

        counter!(
            BACKFILL_CHUNKS_COMPLETED_TOTAL,
            TABLE_NAME_LABEL => self.table.to_string(),
        )
        .increment(1);
        counter!(
            BACKFILL_ROWS_EMITTED_TOTAL,
            TABLE_NAME_LABEL => self.table.to_string(),
        )
        .increment(rows_emitted as u64);
        histogram!(
            BACKFILL_CHUNK_DURATION_SECONDS,
            TABLE_NAME_LABEL => self.table.to_string(),
        )
        .record(started.elapsed().as_secs_f64());

        info!(
            table = %self.table,
            %chunk_id,
            %range,
            rows_emitted,
            buffered = closed.buffer.len(),
            events_streamed,
            "chunk completed",
        );

        Ok(ChunkOutcome::Completed(CompletedChunk {
            chunk_id,
            range: range.clone(),
            rows_emitted,
            events_streamed,
            acked_position: closed.high.position,
        }))
    }

    /// Delivers changes routed outside any window, in log order.
    pub async fn deliver_changes(&self, events: Vec<ChangeEvent>) -> BackfillResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let count = events.len();
        let deliveries = events.into_iter().map(Delivery::Change).collect();
        self.sink.deliver(deliveries).await?;

        counter!(
            BACKFILL_EVENTS_STREAMED_TOTAL,
            TABLE_NAME_LABEL => self.table.to_string(),
        )
        .increment(count as u64);

        Ok(())
    }

    /// Delivers streamed changes until the router hands out the window closed by `high`.
    ///
    /// Returns `None` on shutdown, along with the number of changes streamed meanwhile otherwise.
    async fn watch_window(
        &self,
        chunk_id: ChunkId,
        high: &WatermarkSignal,
        shutdown_rx: &mut ShutdownRx,
    ) -> BackfillResult<Option<(ClosedWindow, usize)>> {
        let deadline = Instant::now() + self.marker_timeout;
        let mut events_streamed = 0;

        loop {
            let drained = self.router.drain(self.batch_max_size).await;

            let mut changes = Vec::with_capacity(drained.items.len());
            let mut closed = None;
            for item in drained.items {
                match item {
                    Routed::Change(event) => changes.push(event),
                    Routed::WindowClosed(window) => closed = Some(window),
                }
            }

            events_streamed += changes.len();
            self.deliver_changes(changes).await?;

            if let Some(window) = closed {
                if window.high.signal.id != high.id {
                    bail!(
                        ErrorKind::InvalidState,
                        "Unexpected window closed",
                        format!(
                            "Chunk {} of table '{}' observed the window of chunk {}",
                            chunk_id, self.table, window.chunk_id
                        )
                    );
                }

                return Ok(Some((window, events_streamed)));
            }

            if let Some(failure) = drained.failure {
                return Err(failure);
            }

            if drained.marker_lost == Some(chunk_id) {
                bail!(
                    ErrorKind::MarkerLost,
                    "High marker observed without low marker",
                    format!(
                        "The low marker of chunk {} of table '{}' never came back through the change log",
                        chunk_id, self.table
                    )
                );
            }

            if drained.remaining > 0 {
                continue;
            }

            if Instant::now() >= deadline {
                bail!(
                    ErrorKind::MarkerLost,
                    "Marker not observed in time",
                    format!(
                        "The high marker {} of chunk {} of table '{}' was not observed within {:?}",
                        high.id, chunk_id, self.table, self.marker_timeout
                    )
                );
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!(table = %self.table, %chunk_id, "shutting down while watching window");
                    return Ok(None);
                }

                _ = self.router.notified() => {}

                _ = sleep_until(deadline) => {}
            }
        }
    }

    /// Checks that the storage returned rows in ascending key order and inside `range`.
    fn check_snapshot_rows(&self, range: &KeyRange, rows: &[SnapshotRow]) -> BackfillResult<()> {
        let mut previous = None;
        for row in rows {
            if !range.contains(&row.key) {
                bail!(
                    ErrorKind::StorageCorrupt,
                    "Chunk read returned a key outside its range",
                    format!(
                        "Reading range {} of table '{}' returned key {}",
                        range, self.table, row.key
                    )
                );
            }

            if let Some(previous) = previous
                && previous >= &row.key
            {
                bail!(
                    ErrorKind::StorageCorrupt,
                    "Chunk read returned keys out of order",
                    format!(
                        "Reading range {} of table '{}' returned key {} after key {}",
                        range, self.table, row.key, previous
                    )
                );
            }
            previous = Some(&row.key);
        }

        Ok(())
    }

    async fn transition(&self, chunk_id: ChunkId, phase: ChunkPhase) {
        let mut state = self.state.lock().await;
        state.set_chunk_phase(chunk_id, phase);
    }
}
