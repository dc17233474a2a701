//! Named points where tests inject chunk failures, compiled only with the `failpoints` feature.
//!
//! A fail point configured with `return(timed_retry)` fails the chunk with a retryable error,
//! `return(no_retry)` or a bare `return` with an error that stops the table.

use fail::fail_point;

use crate::bail;
use crate::error::{BackfillResult, ErrorKind};
use crate::types::{ChunkId, TableName};

/// Between the snapshot read and the high marker write.
pub const CHUNK_BEFORE_HIGH_MARKER: &str = "chunk.before_high_marker";
/// After the window closed, before merged rows are delivered.
pub const CHUNK_BEFORE_MERGE: &str = "chunk.before_merge";

fn injected_error_kind(action: Option<&str>) -> ErrorKind {
    match action {
        Some("timed_retry") => ErrorKind::WithTimedRetry,
        _ => ErrorKind::WithNoRetry,
    }
}

/// Fails the current attempt of `chunk_id` when the fail point `name` is active.
pub fn chunk_fail_point(name: &str, table: &TableName, chunk_id: ChunkId) -> BackfillResult<()> {
    fail_point!(name, |action| {
        bail!(
            injected_error_kind(action.as_deref()),
            "Injected chunk failure",
            format!("Fail point '{name}' failed chunk {chunk_id} of table '{table}'")
        );
    });

    Ok(())
}
