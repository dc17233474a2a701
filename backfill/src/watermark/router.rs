use metrics::counter;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::error::BackfillError;
use crate::metrics::{BACKFILL_MARKERS_IGNORED_TOTAL, TABLE_NAME_LABEL};
use crate::types::{
    ChangeEvent, ChunkId, KeyRange, LogEntry, LogPosition, PrimaryKey, TableName, Watermark,
    WatermarkId,
};
use crate::watermark::buffer::ChunkBuffer;

/// Which keys of a table are delivered as streamed changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frontier {
    /// The backfill is running: keys up to `completed` were already emitted by chunks and keys
    /// above `snapshot_max` are never chunked, so changes to both are streamed.
    Backfilling {
        completed: Option<PrimaryKey>,
        snapshot_max: PrimaryKey,
    },
    /// Every chunk completed, all changes are streamed.
    Streaming,
}

impl Frontier {
    /// Returns `true` when changes to `key` must be delivered as streamed changes.
    pub fn streams(&self, key: &PrimaryKey) -> bool {
        match self {
            Frontier::Streaming => true,
            Frontier::Backfilling {
                completed,
                snapshot_max,
            } => key > snapshot_max || completed.as_ref().is_some_and(|completed| key <= completed),
        }
    }
}

/// A window whose high marker was observed.
#[derive(Debug, Clone)]
pub struct ClosedWindow {
    pub chunk_id: ChunkId,
    pub low: Watermark,
    pub high: Watermark,
    pub buffer: ChunkBuffer,
}

/// An item waiting in the ordered delivery queue.
#[derive(Debug, Clone)]
pub enum Routed {
    Change(ChangeEvent),
    WindowClosed(ClosedWindow),
}

/// Snapshot of the router taken by [`WindowRouter::drain`].
#[derive(Debug, Default)]
pub struct Drained {
    /// Items in log order; a closed window, if any, is always the last item.
    pub items: Vec<Routed>,
    /// Items left in the queue after this drain.
    pub remaining: usize,
    /// Error that stopped the tailer feeding this router.
    pub failure: Option<BackfillError>,
    /// Chunk whose high marker showed up before its low marker.
    pub marker_lost: Option<ChunkId>,
    /// Log position up to which every routed item has been handed out, known only when nothing
    /// is queued and no window is armed.
    pub resolved_position: Option<LogPosition>,
}

#[derive(Debug)]
struct ArmedWindow {
    chunk_id: ChunkId,
    range: KeyRange,
    low_id: WatermarkId,
    high_id: WatermarkId,
    low: Option<Watermark>,
    buffer: ChunkBuffer,
}

#[derive(Debug)]
struct Inner {
    table: TableName,
    frontier: Frontier,
    window: Option<ArmedWindow>,
    queue: VecDeque<Routed>,
    position: LogPosition,
    failure: Option<BackfillError>,
    marker_lost: Option<ChunkId>,
}

impl Inner {
    /// Routes a marker and returns `true` when the chunk driver must be woken up.
    fn observe_marker(&mut self, watermark: Watermark) -> bool {
        let Some(window) = self.window.as_mut() else {
            self.ignore_marker(&watermark, "no window armed");
            return false;
        };

        if watermark.signal.id == window.low_id {
            if window.low.is_some() {
                self.ignore_marker(&watermark, "duplicate low marker");
                return false;
            }

            debug!(
                table = %self.table,
                chunk_id = %window.chunk_id,
                watermark_id = %watermark.signal.id,
                position = %watermark.position,
                "window opened",
            );
            window.low = Some(watermark);

            return false;
        }

        if watermark.signal.id != window.high_id {
            self.ignore_marker(&watermark, "stale marker");
            return false;
        }

        let Some(window) = self.window.take() else {
            return false;
        };

        let Some(low) = window.low else {
            warn!(
                table = %self.table,
                chunk_id = %window.chunk_id,
                watermark_id = %watermark.signal.id,
                "high marker observed before low marker",
            );
            self.marker_lost = Some(window.chunk_id);

            return true;
        };

        debug!(
            table = %self.table,
            chunk_id = %window.chunk_id,
            watermark_id = %watermark.signal.id,
            position = %watermark.position,
            buffered = window.buffer.len(),
            "window closed",
        );

        if let Frontier::Backfilling { completed, .. } = &mut self.frontier {
            *completed = Some(window.range.upper.clone());
        }

        self.queue.push_back(Routed::WindowClosed(ClosedWindow {
            chunk_id: window.chunk_id,
            low,
            high: watermark,
            buffer: window.buffer,
        }));

        true
    }

    /// Routes a row change and returns `true` when it was queued for delivery.
    fn observe_change(&mut self, event: ChangeEvent) -> bool {
        if let Some(window) = self.window.as_mut()
            && window.low.is_some()
            && window.range.contains(&event.key)
        {
            window.buffer.record(event);
            return false;
        }

        if self.frontier.streams(&event.key) {
            self.queue.push_back(Routed::Change(event));
            return true;
        }

        // The key belongs to a chunk not processed yet, whose read will reflect this change.
        false
    }

    fn ignore_marker(&self, watermark: &Watermark, reason: &'static str) {
        debug!(
            table = %self.table,
            chunk_id = %watermark.signal.chunk_id,
            watermark_id = %watermark.signal.id,
            kind = %watermark.signal.kind,
            reason,
            "ignoring marker",
        );

        counter!(
            BACKFILL_MARKERS_IGNORED_TOTAL,
            TABLE_NAME_LABEL => self.table.to_string(),
        )
        .increment(1);
    }

    fn discard_window(&mut self) {
        if let Some(window) = self.window.take() {
            debug!(
                table = %self.table,
                chunk_id = %window.chunk_id,
                buffered = window.buffer.len(),
                "discarding window",
            );
        }

        self.queue
            .retain(|item| !matches!(item, Routed::WindowClosed(_)));
        self.marker_lost = None;
    }
}

/// Routes the entries read by the tailer of one table.
///
/// The router is the meeting point of the two tasks of a table: the tailer calls
/// [`WindowRouter::observe`] for every entry in log order, the chunk driver arms windows and
/// drains the resulting delivery queue. Closing a window and advancing the frontier happen under
/// the same lock, so merged rows always precede later streamed changes of the same keys.
#[derive(Debug, Clone)]
pub struct WindowRouter {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl WindowRouter {
    pub fn new(table: TableName, frontier: Frontier, position: LogPosition) -> Self {
        let inner = Inner {
            table,
            frontier,
            window: None,
            queue: VecDeque::new(),
            position,
            failure: None,
            marker_lost: None,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Arms the window of a chunk attempt; it opens once the low marker `low_id` is observed.
    ///
    /// Fails with the tailer's error if the tailer already stopped.
    pub async fn arm(
        &self,
        chunk_id: ChunkId,
        range: KeyRange,
        low_id: WatermarkId,
        high_id: WatermarkId,
    ) -> Result<(), BackfillError> {
        let mut inner = self.inner.lock().await;
        if let Some(failure) = &inner.failure {
            return Err(failure.clone());
        }

        inner.discard_window();
        inner.window = Some(ArmedWindow {
            chunk_id,
            range,
            low_id,
            high_id,
            low: None,
            buffer: ChunkBuffer::new(),
        });

        Ok(())
    }

    /// Discards the active window of a failed or interrupted attempt and rewinds the frontier to
    /// the last completed chunk.
    ///
    /// Queued changes to keys the rewound frontier no longer streams are dropped as well: they
    /// were queued after the discarded window closed, and the next read of their chunk reflects
    /// them.
    pub async fn abort_window(&self, completed: Option<PrimaryKey>) {
        let mut inner = self.inner.lock().await;
        inner.discard_window();

        let Frontier::Backfilling {
            completed: frontier,
            ..
        } = &mut inner.frontier
        else {
            return;
        };
        *frontier = completed;

        let Inner {
            table,
            frontier,
            queue,
            ..
        } = &mut *inner;
        let queued = queue.len();
        queue.retain(|item| match item {
            Routed::Change(event) => frontier.streams(&event.key),
            Routed::WindowClosed(_) => true,
        });

        let dropped = queued - queue.len();
        if dropped > 0 {
            debug!(%table, dropped, "dropping changes queued for an aborted chunk");
        }
    }

    /// Routes one entry read by the tailer.
    pub async fn observe(&self, entry: LogEntry) {
        let wake = {
            let mut inner = self.inner.lock().await;
            if entry.position() > inner.position {
                inner.position = entry.position();
            }

            match entry {
                LogEntry::Marker(watermark) => inner.observe_marker(watermark),
                LogEntry::Change(event) => inner.observe_change(event),
            }
        };

        if wake {
            self.notify.notify_one();
        }
    }

    /// Records that the tailer read the log up to `position` without routing anything.
    pub async fn observe_idle(&self, position: LogPosition) {
        let mut inner = self.inner.lock().await;
        if position > inner.position {
            inner.position = position;
        }
    }

    /// Records the error that stopped the tailer and wakes up the chunk driver.
    pub async fn fail(&self, err: BackfillError) {
        {
            let mut inner = self.inner.lock().await;
            inner.failure = Some(err);
        }

        self.notify.notify_one();
    }

    pub async fn has_failure(&self) -> bool {
        self.inner.lock().await.failure.is_some()
    }

    /// Prepares the router for a tailer restarted from `position`.
    ///
    /// Queued items are dropped since the new tailer reads them again.
    pub async fn reset(&self, position: LogPosition) {
        let mut inner = self.inner.lock().await;
        inner.discard_window();
        inner.queue.clear();
        inner.failure = None;
        inner.position = position;
    }

    /// Switches to pure streaming after the last chunk completed.
    pub async fn complete_backfill(&self) {
        let mut inner = self.inner.lock().await;
        inner.discard_window();
        inner.frontier = Frontier::Streaming;
    }

    /// Takes up to `max_items` queued items, stopping right after the first closed window.
    pub async fn drain(&self, max_items: usize) -> Drained {
        let mut inner = self.inner.lock().await;

        let mut items = Vec::new();
        while items.len() < max_items.max(1) {
            let Some(item) = inner.queue.pop_front() else {
                break;
            };

            let closes_window = matches!(item, Routed::WindowClosed(_));
            items.push(item);
            if closes_window {
                break;
            }
        }

        let resolved_position =
            (inner.queue.is_empty() && inner.window.is_none()).then_some(inner.position);

        Drained {
            items,
            remaining: inner.queue.len(),
            failure: inner.failure.clone(),
            marker_lost: inner.marker_lost,
            resolved_position,
        }
    }

    /// Waits until the tailer queued something or failed.
    ///
    /// A wake-up sent while nobody waits is kept, so checking the queue and then waiting never
    /// misses an item.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub async fn position(&self) -> LogPosition {
        self.inner.lock().await.position
    }

    pub async fn frontier(&self) -> Frontier {
        self.inner.lock().await.frontier.clone()
    }
}
