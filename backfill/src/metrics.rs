//! Metrics definitions for backfill monitoring.
//!
//! Values are recorded through the [`metrics`] facade; installing an exporter is left to the
//! embedding application.

/// Label for table name in metrics.
pub const TABLE_NAME_LABEL: &str = "table_name";

/// Label for error kind in metrics.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Label for the destination name in metrics.
pub const DESTINATION_LABEL: &str = "destination";

// Chunk metrics

/// Counter for chunks merged and delivered.
pub const BACKFILL_CHUNKS_COMPLETED_TOTAL: &str = "backfill_chunks_completed_total";

/// Counter for chunk attempts that failed and were retried.
pub const BACKFILL_CHUNK_RETRIES_TOTAL: &str = "backfill_chunk_retries_total";

/// Histogram for the duration of a successful chunk attempt, from low marker to delivery.
pub const BACKFILL_CHUNK_DURATION_SECONDS: &str = "backfill_chunk_duration_seconds";

/// Counter for rows emitted by chunk merges.
pub const BACKFILL_ROWS_EMITTED_TOTAL: &str = "backfill_rows_emitted_total";

// Stream metrics

/// Counter for change events delivered outside of any window.
pub const BACKFILL_EVENTS_STREAMED_TOTAL: &str = "backfill_events_streamed_total";

/// Counter for duplicate or stale markers observed and ignored.
pub const BACKFILL_MARKERS_IGNORED_TOTAL: &str = "backfill_markers_ignored_total";

/// Counter for tailer restarts after the change stream ended or failed.
pub const BACKFILL_TAILER_RESTARTS_TOTAL: &str = "backfill_tailer_restarts_total";

// Destination metrics

/// Counter for failed destination pushes.
pub const BACKFILL_DESTINATION_PUSH_FAILURES_TOTAL: &str =
    "backfill_destination_push_failures_total";
