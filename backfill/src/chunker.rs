//! Partitioning of a table's primary-key domain into bounded, ascending key ranges.

use std::sync::Arc;
use tracing::debug;

use crate::bail;
use crate::error::{BackfillResult, ErrorKind};
use crate::source::TableStorage;
use crate::types::{KeyRange, PrimaryKey, TableName};

/// Result of asking the chunker for the next range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextRange {
    Range(KeyRange),
    Done,
}

/// Produces the chunks of one table, up to the maximum key captured when its backfill started.
///
/// Keys above `snapshot_max` are never chunked: they did not exist when the backfill started and
/// reach the destination through streaming instead.
pub struct TableChunker {
    storage: Arc<dyn TableStorage>,
    table: TableName,
    chunk_size: usize,
    identity_prefix_len: usize,
    snapshot_max: PrimaryKey,
}

impl TableChunker {
    pub fn new(
        storage: Arc<dyn TableStorage>,
        table: TableName,
        chunk_size: usize,
        identity_prefix_len: usize,
        snapshot_max: PrimaryKey,
    ) -> Self {
        Self {
            storage,
            table,
            chunk_size: chunk_size.max(1),
            identity_prefix_len,
            snapshot_max,
        }
    }

    pub fn snapshot_max(&self) -> &PrimaryKey {
        &self.snapshot_max
    }

    /// Returns the next range after `last_key`, or [`NextRange::Done`] once `last_key` reaches
    /// the table maximum.
    ///
    /// A range holds at most `chunk_size` keys, unless an identity group straddles the limit:
    /// groups are never split, so the range is extended to the end of the group. Once fewer than
    /// `chunk_size` keys remain, the range reaches `snapshot_max`, even when it holds no key.
    pub async fn next(&self, last_key: Option<&PrimaryKey>) -> BackfillResult<NextRange> {
        if let Some(last_key) = last_key
            && last_key >= &self.snapshot_max
        {
            return Ok(NextRange::Done);
        }

        let mut keys = self
            .storage
            .scan_keys(&self.table, last_key, self.chunk_size)
            .await?;
        self.check_ascending(last_key, &keys)?;

        let full_page = keys.len() >= self.chunk_size;
        let scanned = keys.len();
        keys.retain(|key| key <= &self.snapshot_max);
        let truncated = keys.len() < scanned;

        // The last range always ends at the captured maximum, so keys written below it after
        // this scan are still covered by the range's read.
        let upper = match keys.pop() {
            Some(upper) if full_page && !truncated => self.extend_identity_group(upper).await?,
            _ => self.snapshot_max.clone(),
        };

        let range = KeyRange::new(last_key.cloned(), upper);
        debug!(table = %self.table, %range, "chunker produced range");

        Ok(NextRange::Range(range))
    }

    /// Moves `upper` forward until the next key belongs to a different identity group.
    async fn extend_identity_group(&self, mut upper: PrimaryKey) -> BackfillResult<PrimaryKey> {
        if self.identity_prefix_len >= upper.values().len() {
            return Ok(upper);
        }

        loop {
            let keys = self
                .storage
                .scan_keys(&self.table, Some(&upper), self.chunk_size)
                .await?;
            self.check_ascending(Some(&upper), &keys)?;

            let page_len = keys.len();
            let mut group_ended = false;
            for key in keys {
                if key > self.snapshot_max || !key.shares_prefix(&upper, self.identity_prefix_len)
                {
                    group_ended = true;
                    break;
                }
                upper = key;
            }

            if group_ended || page_len < self.chunk_size {
                return Ok(upper);
            }
        }
    }

    fn check_ascending(
        &self,
        after: Option<&PrimaryKey>,
        keys: &[PrimaryKey],
    ) -> BackfillResult<()> {
        let mut previous = after;
        for key in keys {
            if let Some(previous) = previous
                && key <= previous
            {
                bail!(
                    ErrorKind::StorageCorrupt,
                    "Key scan returned keys out of order",
                    format!(
                        "Key {key} of table '{}' does not follow key {previous}",
                        self.table
                    )
                );
            }
            previous = Some(key);
        }

        Ok(())
    }
}
