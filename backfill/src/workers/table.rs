use config::shared::BackfillConfig;
use metrics::counter;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, debug, error, info, warn};

use crate::arena::{TableDescriptor, TableHandle};
use crate::chunker::{NextRange, TableChunker};
use crate::concurrency::shutdown::{ShutdownRx, is_shutdown_requested};
use crate::destination::Destination;
use crate::destination::sink::DeliverySink;
use crate::error::{BackfillError, BackfillResult};
use crate::metrics::{
    BACKFILL_CHUNK_RETRIES_TOTAL, BACKFILL_TAILER_RESTARTS_TOTAL, ERROR_KIND_LABEL,
    TABLE_NAME_LABEL,
};
use crate::source::SourceHandle;
use crate::state::table::{TablePhase, TableProgress};
use crate::store::ProgressStore;
use crate::tailer::{ChangeLogTailer, spawn_tailer};
use crate::types::{ChunkId, LogPosition, PrimaryKey};
use crate::watermark::coordinator::{ChunkOutcome, ChunkPhase, CompletedChunk, WatermarkCoordinator};
use crate::watermark::router::{Frontier, Routed, WindowRouter};
use crate::workers::policy::{RetryDirective, build_error_handling_policy};
use crate::workers::pool::TableWorkerPool;

/// Counters describing the work done by a table worker since it started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableWorkerStats {
    pub chunks_completed: u64,
    pub rows_emitted: u64,
    pub events_streamed: u64,
    pub chunk_retries: u64,
    pub tailer_restarts: u64,
}

/// Internal state of [`TableWorkerState`].
#[derive(Debug)]
pub struct TableWorkerStateInner {
    handle: TableHandle,
    /// Current phase, `None` until the worker loaded its progress.
    phase: Option<TablePhase>,
    /// Chunk being processed and its state machine phase.
    chunk: Option<(ChunkId, ChunkPhase)>,
    /// Upper bound of the last completed chunk.
    last_key: Option<PrimaryKey>,
    stats: TableWorkerStats,
    /// Number of consecutive automatic retry attempts.
    retry_attempts: u32,
    phase_change: Arc<Notify>,
}

impl TableWorkerStateInner {
    /// Updates the table's phase and notifies all waiters.
    pub fn set_phase(&mut self, phase: TablePhase) {
        info!(
            table = %self.handle,
            from_phase = ?self.phase,
            to_phase = %phase,
            "table phase changing",
        );

        self.phase = Some(phase);

        // Only active listeners are woken up, no permit is stored.
        self.phase_change.notify_waiters();
    }

    pub fn set_chunk_phase(&mut self, chunk_id: ChunkId, phase: ChunkPhase) {
        debug!(
            table = %self.handle,
            %chunk_id,
            from_phase = ?self.chunk.map(|(_, phase)| phase),
            to_phase = %phase,
            "chunk phase changing",
        );

        self.chunk = Some((chunk_id, phase));
    }

    pub fn record_chunk(&mut self, completed: &CompletedChunk) {
        self.last_key = Some(completed.range.upper.clone());
        self.stats.chunks_completed += 1;
        self.stats.rows_emitted += completed.rows_emitted as u64;
        self.stats.events_streamed += completed.events_streamed as u64;
    }

    pub fn record_streamed(&mut self, count: usize) {
        self.stats.events_streamed += count as u64;
    }

    pub fn record_tailer_restart(&mut self) {
        self.stats.tailer_restarts += 1;
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// Increments the retry attempt counter and returns the updated value.
    pub fn increment_retry_attempts(&mut self) -> u32 {
        self.retry_attempts = self.retry_attempts.saturating_add(1);
        self.stats.chunk_retries += 1;
        self.retry_attempts
    }

    pub fn reset_retry_attempts(&mut self) {
        self.retry_attempts = 0;
    }

    pub fn phase(&self) -> Option<TablePhase> {
        self.phase
    }

    pub fn chunk_phase(&self) -> Option<(ChunkId, ChunkPhase)> {
        self.chunk
    }

    pub fn last_key(&self) -> Option<&PrimaryKey> {
        self.last_key.as_ref()
    }

    pub fn stats(&self) -> TableWorkerStats {
        self.stats.clone()
    }
}

/// Shared, observable state of a table worker.
#[derive(Debug, Clone)]
pub struct TableWorkerState {
    inner: Arc<Mutex<TableWorkerStateInner>>,
}

impl TableWorkerState {
    pub fn new(handle: TableHandle) -> Self {
        let inner = TableWorkerStateInner {
            handle,
            phase: None,
            chunk: None,
            last_key: None,
            stats: TableWorkerStats::default(),
            retry_attempts: 0,
            phase_change: Arc::new(Notify::new()),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Waits until the table reaches `phase`.
    pub async fn wait_for_phase(&self, phase: TablePhase) {
        loop {
            let inner = self.inner.lock().await;
            if inner.phase == Some(phase) {
                return;
            }

            // The listener is registered while holding the lock, so a change happening right
            // after the lock is released is not missed.
            let phase_change = inner.phase_change.clone();
            let phase_change_notified = phase_change.notified();
            drop(inner);

            phase_change_notified.await;
        }
    }
}

impl Deref for TableWorkerState {
    type Target = Mutex<TableWorkerStateInner>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Where a table worker starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StartingPoint {
    Backfill {
        last_key: Option<PrimaryKey>,
        snapshot_max: PrimaryKey,
        position: LogPosition,
    },
    Streaming {
        last_key: Option<PrimaryKey>,
        snapshot_max: Option<PrimaryKey>,
        position: LogPosition,
    },
}

/// Result of one step of the chunk loop.
enum ChunkStep {
    Completed(CompletedChunk),
    Finished,
    Shutdown,
}

/// Result of one step of the streaming loop.
enum StreamStep {
    Continue,
    Shutdown,
}

/// The tailer task of a table, aborted when dropped.
#[derive(Default)]
struct TailerSlot {
    task: Option<JoinHandle<()>>,
}

impl TailerSlot {
    fn is_running(&self) -> bool {
        self.task.is_some()
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TailerSlot {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs the backfill of a single table, then keeps streaming its changes until shutdown.
///
/// The worker owns the two tasks of a table: the tailer feeding a [`WindowRouter`], and the
/// chunk driver advancing a [`WatermarkCoordinator`] one chunk at a time. Transient chunk
/// failures retry the whole chunk with exponential backoff; a stopped tailer is restarted from
/// the last acknowledged position.
pub struct TableWorker {
    handle: TableHandle,
    descriptor: TableDescriptor,
    config: Arc<BackfillConfig>,
    source: SourceHandle,
    destination: Arc<dyn Destination>,
    progress_store: Arc<dyn ProgressStore>,
    shutdown_rx: ShutdownRx,
}

impl TableWorker {
    pub fn new(
        handle: TableHandle,
        descriptor: TableDescriptor,
        config: Arc<BackfillConfig>,
        source: SourceHandle,
        destination: Arc<dyn Destination>,
        progress_store: Arc<dyn ProgressStore>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            handle,
            descriptor,
            config,
            source,
            destination,
            progress_store,
            shutdown_rx,
        }
    }

    /// Spawns the worker into `pool` and returns its state.
    pub async fn spawn_into_pool(self, pool: &TableWorkerPool) -> TableWorkerState {
        info!(table = %self.descriptor.name, "starting table worker");

        let state = TableWorkerState::new(self.handle);
        let handle = self.handle;

        let table_worker_span = tracing::info_span!(
            "table_worker",
            table = %self.descriptor.name,
            handle = %self.handle,
        );
        let fut = self.run(state.clone()).instrument(table_worker_span);

        pool.lock().await.spawn(handle, state.clone(), fut);

        state
    }

    async fn run(self, state: TableWorkerState) -> BackfillResult<()> {
        let table = self.descriptor.name.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        let starting_point = self.starting_point().await?;
        info!(%table, starting_point = ?starting_point, "table worker starting");

        let mut tailer = TailerSlot::default();
        match starting_point {
            StartingPoint::Backfill {
                last_key,
                snapshot_max,
                position,
            } => {
                state.lock().await.set_phase(TablePhase::Snapshotting);

                let router = WindowRouter::new(
                    table.clone(),
                    Frontier::Backfilling {
                        completed: last_key.clone(),
                        snapshot_max: snapshot_max.clone(),
                    },
                    position,
                );
                let coordinator = self.coordinator(router.clone(), state.clone());

                let Some((last_key, acked)) = self
                    .run_backfill(
                        &router,
                        &coordinator,
                        &mut tailer,
                        &state,
                        &mut shutdown_rx,
                        last_key,
                        snapshot_max.clone(),
                        position,
                    )
                    .await?
                else {
                    return Ok(());
                };

                router.complete_backfill().await;
                self.progress_store
                    .store_progress(
                        &table,
                        TableProgress::streaming(last_key.clone(), Some(snapshot_max.clone()), acked),
                    )
                    .await?;
                state.lock().await.set_phase(TablePhase::Streaming);

                info!(%table, position = %acked, "backfill completed, streaming changes");

                self.run_streaming(
                    &router,
                    &coordinator,
                    &mut tailer,
                    &state,
                    &mut shutdown_rx,
                    last_key,
                    Some(snapshot_max),
                    acked,
                )
                .await
            }
            StartingPoint::Streaming {
                last_key,
                snapshot_max,
                position,
            } => {
                state.lock().await.set_phase(TablePhase::Streaming);

                let router = WindowRouter::new(table.clone(), Frontier::Streaming, position);
                let coordinator = self.coordinator(router.clone(), state.clone());

                self.run_streaming(
                    &router,
                    &coordinator,
                    &mut tailer,
                    &state,
                    &mut shutdown_rx,
                    last_key,
                    snapshot_max,
                    position,
                )
                .await
            }
        }
    }

    /// Decides where the table starts from, storing the initial progress of a fresh table.
    async fn starting_point(&self) -> BackfillResult<StartingPoint> {
        let table = &self.descriptor.name;
        let resume_position = self.config.resume_position.map(LogPosition);

        if let Some(progress) = self.progress_store.load_progress(table).await? {
            info!(
                %table,
                phase = %progress.phase,
                position = %progress.position,
                "loaded table progress",
            );

            let position = resume_position.unwrap_or(progress.position);
            match (progress.phase, progress.snapshot_max) {
                (TablePhase::Snapshotting, Some(snapshot_max)) => {
                    return Ok(StartingPoint::Backfill {
                        last_key: progress.last_key,
                        snapshot_max,
                        position,
                    });
                }
                (TablePhase::Streaming, snapshot_max) => {
                    return Ok(StartingPoint::Streaming {
                        last_key: progress.last_key,
                        snapshot_max,
                        position,
                    });
                }
                (TablePhase::Snapshotting, None) => {
                    warn!(%table, "stored progress has no snapshot maximum, restarting backfill");
                }
            }
        }

        // The log head is captured before the bounds, so every key above the captured maximum
        // was written after the tailer's starting position.
        let position = match resume_position {
            Some(position) => position,
            None => self.source.log.head_position().await?,
        };

        let Some(bounds) = self.source.storage.table_bounds(table).await? else {
            info!(%table, "table is empty, skipping backfill");

            self.progress_store
                .store_progress(table, TableProgress::streaming(None, None, position))
                .await?;

            return Ok(StartingPoint::Streaming {
                last_key: None,
                snapshot_max: None,
                position,
            });
        };

        info!(
            %table,
            min = %bounds.min,
            max = %bounds.max,
            approximate_rows = bounds.approximate_rows,
            "captured table bounds",
        );

        self.progress_store
            .store_progress(
                table,
                TableProgress::snapshotting(None, bounds.max.clone(), position),
            )
            .await?;

        Ok(StartingPoint::Backfill {
            last_key: None,
            snapshot_max: bounds.max,
            position,
        })
    }

    fn coordinator(&self, router: WindowRouter, state: TableWorkerState) -> WatermarkCoordinator {
        let sink = DeliverySink::new(
            self.destination.clone(),
            self.descriptor.name.clone(),
            self.config.sink_push_attempts,
            Duration::from_millis(self.config.retry.initial_delay_ms),
        );

        WatermarkCoordinator::new(
            self.descriptor.name.clone(),
            self.source.clone(),
            router,
            sink,
            state,
            Duration::from_millis(self.config.marker_timeout_ms),
            self.config.batch.max_size,
        )
    }

    /// Processes every chunk in ascending order.
    ///
    /// Returns the last key and acknowledged position once all chunks completed, or `None` on
    /// shutdown.
    #[expect(clippy::too_many_arguments)]
    async fn run_backfill(
        &self,
        router: &WindowRouter,
        coordinator: &WatermarkCoordinator,
        tailer: &mut TailerSlot,
        state: &TableWorkerState,
        shutdown_rx: &mut ShutdownRx,
        mut last_key: Option<PrimaryKey>,
        snapshot_max: PrimaryKey,
        mut acked: LogPosition,
    ) -> BackfillResult<Option<(Option<PrimaryKey>, LogPosition)>> {
        let table = &self.descriptor.name;
        let chunker = TableChunker::new(
            self.source.storage.clone(),
            table.clone(),
            self.config.chunk_size,
            self.descriptor.identity_prefix_len,
            snapshot_max.clone(),
        );

        let mut chunk_id = ChunkId(0);
        loop {
            if is_shutdown_requested(shutdown_rx) {
                info!(%table, "shutting down table worker before next chunk");
                return Ok(None);
            }

            let step = self
                .next_chunk(
                    &chunker,
                    router,
                    coordinator,
                    tailer,
                    state,
                    shutdown_rx,
                    chunk_id,
                    last_key.as_ref(),
                    acked,
                )
                .await;

            match step {
                Ok(ChunkStep::Completed(completed)) => {
                    last_key = Some(completed.range.upper.clone());
                    acked = completed.acked_position;

                    self.progress_store
                        .store_progress(
                            table,
                            TableProgress::snapshotting(last_key.clone(), snapshot_max.clone(), acked),
                        )
                        .await?;

                    let mut state_guard = state.lock().await;
                    state_guard.record_chunk(&completed);
                    state_guard.reset_retry_attempts();

                    chunk_id = chunk_id.next();
                }
                Ok(ChunkStep::Finished) => {
                    return Ok(Some((last_key, acked)));
                }
                Ok(ChunkStep::Shutdown) => {
                    router.abort_window(last_key).await;
                    info!(%table, %chunk_id, "chunk interrupted by shutdown");

                    return Ok(None);
                }
                Err(err) => {
                    router.abort_window(last_key.clone()).await;

                    if self.handle_error(state, shutdown_rx, err).await? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    #[expect(clippy::too_many_arguments)]
    async fn next_chunk(
        &self,
        chunker: &TableChunker,
        router: &WindowRouter,
        coordinator: &WatermarkCoordinator,
        tailer: &mut TailerSlot,
        state: &TableWorkerState,
        shutdown_rx: &mut ShutdownRx,
        chunk_id: ChunkId,
        last_key: Option<&PrimaryKey>,
        acked: LogPosition,
    ) -> BackfillResult<ChunkStep> {
        self.ensure_tailer(router, tailer, state, shutdown_rx, acked)
            .await?;

        let range = match chunker.next(last_key).await? {
            NextRange::Range(range) => range,
            NextRange::Done => return Ok(ChunkStep::Finished),
        };

        match coordinator.process_chunk(chunk_id, &range, shutdown_rx).await? {
            ChunkOutcome::Completed(completed) => Ok(ChunkStep::Completed(completed)),
            ChunkOutcome::Shutdown => Ok(ChunkStep::Shutdown),
        }
    }

    /// Delivers batches of streamed changes until shutdown.
    #[expect(clippy::too_many_arguments)]
    async fn run_streaming(
        &self,
        router: &WindowRouter,
        coordinator: &WatermarkCoordinator,
        tailer: &mut TailerSlot,
        state: &TableWorkerState,
        shutdown_rx: &mut ShutdownRx,
        last_key: Option<PrimaryKey>,
        snapshot_max: Option<PrimaryKey>,
        mut acked: LogPosition,
    ) -> BackfillResult<()> {
        let table = &self.descriptor.name;
        let mut stored = acked;

        loop {
            let step = self
                .stream_batch(router, coordinator, tailer, state, shutdown_rx, &mut acked)
                .await;

            match step {
                Ok(step) => {
                    state.lock().await.reset_retry_attempts();

                    if acked > stored {
                        self.progress_store
                            .store_progress(
                                table,
                                TableProgress::streaming(
                                    last_key.clone(),
                                    snapshot_max.clone(),
                                    acked,
                                ),
                            )
                            .await?;
                        stored = acked;
                    }

                    if matches!(step, StreamStep::Shutdown) {
                        info!(%table, position = %acked, "table worker stopped streaming");
                        return Ok(());
                    }
                }
                Err(err) => {
                    if self.handle_error(state, shutdown_rx, err).await? {
                        info!(%table, position = %acked, "table worker stopped streaming");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Collects and delivers one batch of streamed changes, advancing `acked`.
    ///
    /// The batch is flushed once it holds `batch.max_size` changes, once `batch.max_fill_ms`
    /// elapsed, or on shutdown.
    async fn stream_batch(
        &self,
        router: &WindowRouter,
        coordinator: &WatermarkCoordinator,
        tailer: &mut TailerSlot,
        state: &TableWorkerState,
        shutdown_rx: &mut ShutdownRx,
        acked: &mut LogPosition,
    ) -> BackfillResult<StreamStep> {
        self.ensure_tailer(router, tailer, state, shutdown_rx, *acked)
            .await?;

        let max_size = self.config.batch.max_size.max(1);
        let deadline = Instant::now() + Duration::from_millis(self.config.batch.max_fill_ms);

        let mut batch = Vec::new();
        let mut resolved_position = None;
        let mut step = StreamStep::Continue;
        loop {
            let drained = router.drain(max_size - batch.len()).await;
            for item in drained.items {
                if let Routed::Change(event) = item {
                    batch.push(event);
                }
            }
            resolved_position = drained.resolved_position;

            if let Some(failure) = drained.failure {
                return Err(failure);
            }

            if batch.len() >= max_size || Instant::now() >= deadline {
                break;
            }

            if drained.remaining > 0 {
                continue;
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    step = StreamStep::Shutdown;
                    break;
                }

                _ = router.notified() => {}

                _ = sleep_until(deadline) => {}
            }
        }

        // Without a resolved position, everything up to the last delivered change is handled.
        let position = resolved_position
            .or_else(|| batch.last().map(|event| event.position))
            .unwrap_or(*acked);

        let count = batch.len();
        coordinator.deliver_changes(batch).await?;
        if count > 0 {
            state.lock().await.record_streamed(count);
        }

        if position > *acked {
            *acked = position;
        }

        Ok(step)
    }

    /// Starts the tailer, or restarts it from `acked` when it stopped with an error.
    async fn ensure_tailer(
        &self,
        router: &WindowRouter,
        tailer: &mut TailerSlot,
        state: &TableWorkerState,
        shutdown_rx: &ShutdownRx,
        acked: LogPosition,
    ) -> BackfillResult<()> {
        let table = &self.descriptor.name;

        if tailer.is_running() {
            if !router.has_failure().await {
                return Ok(());
            }

            tailer.stop();
            warn!(%table, position = %acked, "restarting tailer from acknowledged position");

            counter!(
                BACKFILL_TAILER_RESTARTS_TOTAL,
                TABLE_NAME_LABEL => table.to_string(),
            )
            .increment(1);
            state.lock().await.record_tailer_restart();
        }

        router.reset(acked).await;

        let change_log_tailer =
            ChangeLogTailer::start(self.source.log.as_ref(), table.clone(), acked).await?;
        tailer.task = Some(spawn_tailer(
            change_log_tailer,
            router.clone(),
            shutdown_rx.clone(),
            Duration::from_millis(self.config.batch.max_fill_ms.max(1)),
        ));

        Ok(())
    }

    /// Handles a failed attempt using policy-based retry and exponential backoff.
    ///
    /// Returns `Ok(true)` if shutdown was requested while waiting to retry, `Ok(false)` if the
    /// attempt should be retried, or `Err` when the failure must stop the table.
    async fn handle_error(
        &self,
        state: &TableWorkerState,
        shutdown_rx: &mut ShutdownRx,
        err: BackfillError,
    ) -> BackfillResult<bool> {
        let table = &self.descriptor.name;
        let policy = build_error_handling_policy(&err);

        if policy.retry_directive() == RetryDirective::NoRetry {
            error!(
                %table,
                error = %err,
                solution = policy.solution(),
                "table worker failed",
            );

            return Err(err);
        }

        let retry_attempts = {
            let mut state_guard = state.lock().await;
            if state_guard.retry_attempts() + 1 >= self.config.retry.max_attempts {
                error!(
                    %table,
                    error = %err,
                    max_attempts = self.config.retry.max_attempts,
                    "max retry attempts reached",
                );
                state_guard.reset_retry_attempts();

                return Err(err);
            }

            state_guard.increment_retry_attempts()
        };

        counter!(
            BACKFILL_CHUNK_RETRIES_TOTAL,
            TABLE_NAME_LABEL => table.to_string(),
            ERROR_KIND_LABEL => format!("{:?}", err.kind()),
        )
        .increment(1);

        let delay = self.retry_delay(retry_attempts);
        warn!(
            %table,
            error = %err,
            attempt = retry_attempts,
            delay = ?delay,
            "attempt failed, retrying",
        );

        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                info!(%table, "shutting down table worker while waiting to retry");
                state.lock().await.reset_retry_attempts();

                Ok(true)
            }

            _ = tokio::time::sleep(delay) => Ok(false),
        }
    }

    /// Returns the backoff delay before retry number `attempt`, starting at 1.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let retry = &self.config.retry;
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay_ms = (retry.initial_delay_ms as f64) * retry.backoff_factor.powi(exponent);

        Duration::from_millis(delay_ms.min(retry.max_delay_ms as f64) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::TableArena;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::destination::memory::MemoryDestination;
    use crate::source::memory::MemorySource;
    use crate::store::memory::MemoryProgressStore;
    use config::shared::TableConfig;

    fn worker(config: BackfillConfig) -> TableWorker {
        let arena = TableArena::from_config(&config.tables).unwrap();
        let (handle, descriptor) = arena.iter().next().unwrap();
        let (_tx, shutdown_rx) = create_shutdown_channel();

        TableWorker::new(
            handle,
            descriptor.clone(),
            Arc::new(config),
            SourceHandle::from_source(MemorySource::new()),
            Arc::new(MemoryDestination::new()),
            Arc::new(MemoryProgressStore::new()),
            shutdown_rx,
        )
    }

    fn config() -> BackfillConfig {
        let mut config = BackfillConfig::with_tables(vec![TableConfig {
            name: "users".to_string(),
            key_columns: vec!["id".to_string()],
            identity_columns: None,
        }]);
        config.retry.initial_delay_ms = 100;
        config.retry.max_delay_ms = 1_000;
        config.retry.backoff_factor = 2.0;

        config
    }

    #[test]
    fn retry_delay_grows_exponentially_up_to_the_maximum() {
        let worker = worker(config());

        assert_eq!(worker.retry_delay(1), Duration::from_millis(100));
        assert_eq!(worker.retry_delay(2), Duration::from_millis(200));
        assert_eq!(worker.retry_delay(4), Duration::from_millis(800));
        assert_eq!(worker.retry_delay(5), Duration::from_millis(1_000));
        assert_eq!(worker.retry_delay(100), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn wait_for_phase_returns_once_phase_is_set() {
        let state = TableWorkerState::new(worker(config()).handle);

        let waiter = tokio::spawn({
            let state = state.clone();
            async move { state.wait_for_phase(TablePhase::Streaming).await }
        });

        state.lock().await.set_phase(TablePhase::Snapshotting);
        state.lock().await.set_phase(TablePhase::Streaming);

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
