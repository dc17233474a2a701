use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use crate::bail;
use crate::error::{BackfillResult, ErrorKind};
use crate::source::base::{ChangeLog, LogStream, TableStorage};
use crate::types::{
    ChangeEvent, ChangeKind, KeyRange, LogEntry, LogPosition, PrimaryKey, SnapshotRow,
    TableBounds, TableName, TableRow, Watermark, WatermarkKind, WatermarkSignal,
};

type SourceHook = Box<dyn FnOnce() + Send>;

/// Version of the log broadcast to open streams.
///
/// `appended` grows with every log append, `epoch` grows every time open streams are
/// disconnected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LogVersion {
    appended: u64,
    epoch: u64,
}

/// Pending injected faults, each consumed by one operation.
#[derive(Debug, Default)]
struct Faults {
    failing_reads: usize,
    failing_scans: usize,
    reversed_scans: usize,
    failing_marker_writes: usize,
    swallowed_markers: usize,
}

struct Inner {
    tables: HashMap<TableName, BTreeMap<PrimaryKey, TableRow>>,
    log: Vec<LogEntry>,
    last_position: LogPosition,
    version: LogVersion,
    faults: Faults,
    read_hooks: VecDeque<SourceHook>,
    high_marker_hooks: VecDeque<SourceHook>,
}

impl Inner {
    fn next_position(&mut self) -> LogPosition {
        self.last_position = self.last_position.next();
        self.last_position
    }

    fn append(&mut self, entry: LogEntry) {
        self.log.push(entry);
        self.version.appended += 1;
    }

    fn apply(&mut self, table: TableName, key: PrimaryKey, row: Option<TableRow>, kind: ChangeKind) {
        let rows = self.tables.entry(table.clone()).or_default();
        match &row {
            Some(row) => {
                rows.insert(key.clone(), row.clone());
            }
            None => {
                rows.remove(&key);
            }
        }

        let position = self.next_position();
        self.append(LogEntry::Change(ChangeEvent {
            table,
            key,
            row,
            position,
            kind,
        }));
    }

    fn entries_after(&self, position: LogPosition) -> Vec<LogEntry> {
        let start = self.log.partition_point(|entry| entry.position() <= position);
        self.log[start..].to_vec()
    }
}

/// In-memory source implementing both [`TableStorage`] and [`ChangeLog`].
///
/// Tables are kept ordered by key and every mutation is applied together with an append to a
/// single ordered log, so a chunk read always reflects exactly the log prefix written before it.
/// Markers are appended into the same log. The source supports deterministic fault injection,
/// which makes it the collaborator of choice for tests and local development.
#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
    version_tx: Arc<watch::Sender<LogVersion>>,
}

impl MemorySource {
    /// Creates a new empty source.
    pub fn new() -> Self {
        let inner = Inner {
            tables: HashMap::new(),
            log: Vec::new(),
            last_position: LogPosition::ZERO,
            version: LogVersion::default(),
            faults: Faults::default(),
            read_hooks: VecDeque::new(),
            high_marker_hooks: VecDeque::new(),
        };
        let (version_tx, _) = watch::channel(LogVersion::default());

        Self {
            inner: Arc::new(Mutex::new(inner)),
            version_tx: Arc::new(version_tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    fn publish(&self, version: LogVersion) {
        self.version_tx.send_replace(version);
    }

    /// Creates `table` without rows, if it does not exist yet.
    pub fn create_table(&self, table: impl Into<TableName>) {
        let mut inner = self.lock();
        inner.tables.entry(table.into()).or_default();
    }

    /// Loads rows without writing them to the change log, as if they predate the log.
    pub fn load_rows<I>(&self, table: impl Into<TableName>, rows: I)
    where
        I: IntoIterator<Item = (PrimaryKey, TableRow)>,
    {
        let mut inner = self.lock();
        inner.tables.entry(table.into()).or_default().extend(rows);
    }

    /// Inserts a row and appends the matching change to the log.
    pub fn insert(&self, table: impl Into<TableName>, key: impl Into<PrimaryKey>, row: TableRow) {
        self.mutate(table.into(), key.into(), Some(row), ChangeKind::Insert);
    }

    /// Updates a row and appends the matching change to the log.
    pub fn update(&self, table: impl Into<TableName>, key: impl Into<PrimaryKey>, row: TableRow) {
        self.mutate(table.into(), key.into(), Some(row), ChangeKind::Update);
    }

    /// Deletes a row and appends the matching change to the log.
    pub fn delete(&self, table: impl Into<TableName>, key: impl Into<PrimaryKey>) {
        self.mutate(table.into(), key.into(), None, ChangeKind::Delete);
    }

    fn mutate(&self, table: TableName, key: PrimaryKey, row: Option<TableRow>, kind: ChangeKind) {
        let version = {
            let mut inner = self.lock();
            inner.apply(table, key, row, kind);
            inner.version
        };

        self.publish(version);
    }

    /// Returns a copy of the current rows of `table`.
    pub fn rows(&self, table: &TableName) -> BTreeMap<PrimaryKey, TableRow> {
        let inner = self.lock();
        inner.tables.get(table).cloned().unwrap_or_default()
    }

    /// Returns a copy of every log entry.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.lock().log.clone()
    }

    /// Returns the last position assigned by the log.
    pub fn current_position(&self) -> LogPosition {
        self.lock().last_position
    }

    /// Makes the next `count` chunk reads fail with [`ErrorKind::SnapshotReadFailed`].
    pub fn fail_next_reads(&self, count: usize) {
        self.lock().faults.failing_reads += count;
    }

    /// Makes the next `count` key scans fail with [`ErrorKind::SourceUnavailable`].
    pub fn fail_next_scans(&self, count: usize) {
        self.lock().faults.failing_scans += count;
    }

    /// Makes the next `count` key scans return keys in descending order.
    pub fn reverse_next_scans(&self, count: usize) {
        self.lock().faults.reversed_scans += count;
    }

    /// Makes the next `count` marker writes fail with [`ErrorKind::MarkerWriteFailed`].
    pub fn fail_next_marker_writes(&self, count: usize) {
        self.lock().faults.failing_marker_writes += count;
    }

    /// Makes the next `count` marker writes succeed without the marker ever reaching the log.
    pub fn swallow_next_markers(&self, count: usize) {
        self.lock().faults.swallowed_markers += count;
    }

    /// Ends every open stream, as if the connection to the log was lost.
    pub fn disconnect_streams(&self) {
        let version = {
            let mut inner = self.lock();
            inner.version.epoch += 1;
            inner.version
        };

        debug!(epoch = version.epoch, "disconnecting memory source streams");

        self.publish(version);
    }

    /// Runs `hook` right after the next chunk read, before the read returns.
    ///
    /// Hooks queue up and are consumed one per read, which lets tests mutate the source at a
    /// precise point inside a chunk's window.
    pub fn after_next_chunk_read<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.lock().read_hooks.push_back(Box::new(hook));
    }

    /// Runs `hook` right after the next high marker reached the log.
    ///
    /// Mutations made by the hook land right behind the marker, after the window it closes.
    pub fn after_next_high_marker<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.lock().high_marker_hooks.push_back(Box::new(hook));
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemorySource")
            .field("tables", &inner.tables.len())
            .field("log_entries", &inner.log.len())
            .field("last_position", &inner.last_position)
            .finish()
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait::async_trait]
impl TableStorage for MemorySource {
    async fn table_bounds(&self, table: &TableName) -> BackfillResult<Option<TableBounds>> {
        let inner = self.lock();
        let Some(rows) = inner.tables.get(table) else {
            bail!(
                ErrorKind::SourceUnavailable,
                "Table not found in source",
                format!("The table '{table}' does not exist in the memory source")
            );
        };

        let bounds = match (rows.first_key_value(), rows.last_key_value()) {
            (Some((min, _)), Some((max, _))) => Some(TableBounds {
                min: min.clone(),
                max: max.clone(),
                approximate_rows: rows.len() as u64,
            }),
            _ => None,
        };

        Ok(bounds)
    }

    async fn scan_keys(
        &self,
        table: &TableName,
        after: Option<&PrimaryKey>,
        limit: usize,
    ) -> BackfillResult<Vec<PrimaryKey>> {
        let mut inner = self.lock();

        if inner.faults.failing_scans > 0 {
            inner.faults.failing_scans -= 1;
            bail!(
                ErrorKind::SourceUnavailable,
                "Key scan failed",
                format!("Injected key scan failure for table '{table}'")
            );
        }

        let reversed = inner.faults.reversed_scans > 0;
        if reversed {
            inner.faults.reversed_scans -= 1;
        }

        let Some(rows) = inner.tables.get(table) else {
            bail!(
                ErrorKind::SourceUnavailable,
                "Table not found in source",
                format!("The table '{table}' does not exist in the memory source")
            );
        };

        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let mut keys: Vec<PrimaryKey> = rows
            .range::<PrimaryKey, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(key, _)| key.clone())
            .collect();

        if reversed {
            keys.reverse();
        }

        Ok(keys)
    }

    async fn read_chunk(
        &self,
        table: &TableName,
        range: &KeyRange,
    ) -> BackfillResult<Vec<SnapshotRow>> {
        let (rows, hook) = {
            let mut inner = self.lock();

            if inner.faults.failing_reads > 0 {
                inner.faults.failing_reads -= 1;
                bail!(
                    ErrorKind::SnapshotReadFailed,
                    "Chunk read failed",
                    format!("Injected read failure for range {range} of table '{table}'")
                );
            }

            let rows: Vec<SnapshotRow> = inner
                .tables
                .get(table)
                .map(|rows| {
                    rows.iter()
                        .filter(|(key, _)| range.contains(key))
                        .map(|(key, row)| SnapshotRow::new(key.clone(), row.clone()))
                        .collect()
                })
                .unwrap_or_default();

            (rows, inner.read_hooks.pop_front())
        };

        // The hook runs outside of the lock since it usually mutates the source.
        if let Some(hook) = hook {
            hook();
        }

        Ok(rows)
    }
}

#[async_trait::async_trait]
impl ChangeLog for MemorySource {
    async fn head_position(&self) -> BackfillResult<LogPosition> {
        Ok(self.current_position())
    }

    async fn stream_from(&self, position: LogPosition) -> BackfillResult<LogStream> {
        let mut version_rx = self.version_tx.subscribe();
        let epoch = version_rx.borrow_and_update().epoch;

        let state = StreamState {
            inner: self.inner.clone(),
            version_rx,
            epoch,
            after: position,
            pending: VecDeque::new(),
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                let version = *state.version_rx.borrow_and_update();
                if version.epoch != state.epoch {
                    return None;
                }

                if let Some(entry) = state.pending.pop_front() {
                    state.after = entry.position();
                    return Some((Ok(entry), state));
                }

                let entries = lock(&state.inner).entries_after(state.after);
                if !entries.is_empty() {
                    state.pending.extend(entries);
                    continue;
                }

                if state.version_rx.changed().await.is_err() {
                    return None;
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn insert_marker(&self, signal: &WatermarkSignal) -> BackfillResult<LogPosition> {
        let (position, version, hook) = {
            let mut inner = self.lock();

            if inner.faults.failing_marker_writes > 0 {
                inner.faults.failing_marker_writes -= 1;
                bail!(
                    ErrorKind::MarkerWriteFailed,
                    "Marker write failed",
                    format!(
                        "Injected failure writing {} marker {} of chunk {}",
                        signal.kind, signal.id, signal.chunk_id
                    )
                );
            }

            let position = inner.next_position();

            if inner.faults.swallowed_markers > 0 {
                inner.faults.swallowed_markers -= 1;
                debug!(watermark_id = %signal.id, %position, "swallowing marker");

                return Ok(position);
            }

            inner.append(LogEntry::Marker(Watermark {
                signal: signal.clone(),
                position,
            }));

            let hook = match signal.kind {
                WatermarkKind::High => inner.high_marker_hooks.pop_front(),
                WatermarkKind::Low => None,
            };

            (position, inner.version, hook)
        };

        self.publish(version);

        if let Some(hook) = hook {
            hook();
        }

        Ok(position)
    }
}

struct StreamState {
    inner: Arc<Mutex<Inner>>,
    version_rx: watch::Receiver<LogVersion>,
    epoch: u64,
    after: LogPosition,
    pending: VecDeque<LogEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cell, ChunkId};
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    fn row(value: &str) -> TableRow {
        TableRow::new(vec![Cell::from(value)])
    }

    #[tokio::test]
    async fn mutations_and_markers_share_one_ordered_log() {
        let source = MemorySource::new();
        let table = TableName::from("users");
        source.insert("users", 1i64, row("a"));

        let marker = WatermarkSignal::low(table.clone(), ChunkId(0));
        let marker_position = source.insert_marker(&marker).await.unwrap();
        source.update("users", 1i64, row("b"));

        let mut stream = source.stream_from(LogPosition::ZERO).await.unwrap();
        let mut positions = Vec::new();
        for _ in 0..3 {
            let entry = stream.next().await.unwrap().unwrap();
            positions.push(entry.position());
            if let LogEntry::Marker(watermark) = entry {
                assert_eq!(watermark.signal.kind, WatermarkKind::Low);
                assert_eq!(watermark.position, marker_position);
            }
        }

        assert_eq!(positions, vec![LogPosition(1), LogPosition(2), LogPosition(3)]);
        assert_eq!(source.rows(&table).get(&PrimaryKey::from(1i64)), Some(&row("b")));
    }

    #[tokio::test]
    async fn stream_resumes_strictly_after_position_and_waits_for_appends() {
        let source = MemorySource::new();
        source.insert("users", 1i64, row("a"));
        source.insert("users", 2i64, row("b"));

        let mut stream = source.stream_from(LogPosition(1)).await.unwrap();
        let entry = stream.next().await.unwrap().unwrap();
        assert_eq!(entry.position(), LogPosition(2));

        assert!(
            timeout(Duration::from_millis(50), stream.next())
                .await
                .is_err()
        );

        source.delete("users", 1i64);
        let entry = stream.next().await.unwrap().unwrap();
        assert_eq!(entry.position(), LogPosition(3));
    }

    #[tokio::test]
    async fn disconnect_ends_open_streams_only() {
        let source = MemorySource::new();
        source.insert("users", 1i64, row("a"));

        let mut stream = source.stream_from(LogPosition(1)).await.unwrap();
        source.disconnect_streams();
        assert!(stream.next().await.is_none());

        let mut stream = source.stream_from(LogPosition::ZERO).await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn swallowed_marker_consumes_position_without_log_entry() {
        let source = MemorySource::new();
        source.swallow_next_markers(1);

        let marker = WatermarkSignal::high(TableName::from("users"), ChunkId(0));
        let position = source.insert_marker(&marker).await.unwrap();

        assert_eq!(position, LogPosition(1));
        assert!(source.log_entries().is_empty());
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_once() {
        let source = MemorySource::new();
        let table = TableName::from("users");
        source.insert("users", 1i64, row("a"));
        source.fail_next_reads(1);
        source.fail_next_marker_writes(1);

        let range = KeyRange::new(None, PrimaryKey::from(1i64));
        let err = source.read_chunk(&table, &range).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SnapshotReadFailed);
        assert_eq!(source.read_chunk(&table, &range).await.unwrap().len(), 1);

        let marker = WatermarkSignal::low(table, ChunkId(0));
        let err = source.insert_marker(&marker).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MarkerWriteFailed);
        assert!(source.insert_marker(&marker).await.is_ok());
    }

    #[tokio::test]
    async fn read_hook_runs_after_point_in_time_read() {
        let source = MemorySource::new();
        let table = TableName::from("users");
        source.insert("users", 1i64, row("a"));

        let hook_source = source.clone();
        source.after_next_chunk_read(move || hook_source.update("users", 1i64, row("b")));

        let rows = source
            .read_chunk(&table, &KeyRange::new(None, PrimaryKey::from(1i64)))
            .await
            .unwrap();

        assert_eq!(rows[0].row, row("a"));
        assert_eq!(source.rows(&table).get(&PrimaryKey::from(1i64)), Some(&row("b")));
    }

    #[tokio::test]
    async fn scan_pages_start_strictly_after_key() {
        let source = MemorySource::new();
        let table = TableName::from("users");
        source.load_rows(
            "users",
            (1..=6i64).map(|k| (PrimaryKey::from(k), row("a"))),
        );

        let keys = source.scan_keys(&table, None, 2).await.unwrap();
        assert_eq!(keys, vec![PrimaryKey::from(1i64), PrimaryKey::from(2i64)]);

        let keys = source
            .scan_keys(&table, Some(&PrimaryKey::from(2i64)), 3)
            .await
            .unwrap();
        assert_eq!(
            keys,
            vec![
                PrimaryKey::from(3i64),
                PrimaryKey::from(4i64),
                PrimaryKey::from(5i64)
            ]
        );

        let keys = source
            .scan_keys(&table, Some(&PrimaryKey::from(6i64)), 3)
            .await
            .unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn high_marker_hook_writes_behind_the_marker() {
        let source = MemorySource::new();
        let table = TableName::from("users");

        let hook_source = source.clone();
        source.after_next_high_marker(move || hook_source.insert("users", 3i64, row("a")));

        let low = WatermarkSignal::low(table.clone(), ChunkId(0));
        source.insert_marker(&low).await.unwrap();
        assert_eq!(source.log_entries().len(), 1);

        let high = WatermarkSignal::high(table.clone(), ChunkId(0));
        let high_position = source.insert_marker(&high).await.unwrap();

        let entries = source.log_entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].position(), high_position);
        assert!(matches!(&entries[2], LogEntry::Change(event) if event.key == PrimaryKey::from(3i64)));
        assert!(source.rows(&table).contains_key(&PrimaryKey::from(3i64)));
    }
}
