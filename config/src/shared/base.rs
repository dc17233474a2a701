use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The chunk row-count limit cannot be zero.
    #[error("`chunk_size` cannot be zero")]
    ChunkSizeZero,
    /// The marker observation timeout cannot be zero.
    #[error("`marker_timeout_ms` cannot be zero")]
    MarkerTimeoutZero,
    /// At least one table must be configured.
    #[error("at least one table must be configured")]
    NoTables,
    /// The same table was configured more than once.
    #[error("table `{0}` is configured more than once")]
    DuplicateTable(String),
    /// A table was configured without key columns.
    #[error("table `{0}` must declare at least one key column")]
    MissingKeyColumns(String),
    /// The identity columns are not a non-empty prefix of the key columns.
    #[error("identity columns of table `{0}` must be a non-empty prefix of its key columns")]
    InvalidIdentityColumns(String),
    /// A field holds a value outside of its allowed domain.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
