use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{
    BatchConfig, DestinationConfig, RetryConfig, SourceConfig, ValidationError,
};

/// A table taking part in the backfill.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TableConfig {
    /// Fully qualified table name, for example `public.orders`.
    pub name: String,
    /// Ordered key columns; chunks partition the table by this composite key.
    pub key_columns: Vec<String>,
    /// Leading key columns that identify a group of rows which must never be split across two
    /// chunks. Defaults to the whole key.
    #[serde(default)]
    pub identity_columns: Option<Vec<String>>,
}

impl TableConfig {
    /// Returns the number of leading key columns forming an identity group.
    pub fn identity_prefix_len(&self) -> usize {
        self.identity_columns
            .as_ref()
            .map(Vec::len)
            .unwrap_or(self.key_columns.len())
    }

    /// Validates the key and identity column declarations.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.key_columns.is_empty() {
            return Err(ValidationError::MissingKeyColumns(self.name.clone()));
        }

        if let Some(identity_columns) = &self.identity_columns {
            let is_prefix = !identity_columns.is_empty()
                && identity_columns.len() <= self.key_columns.len()
                && identity_columns
                    .iter()
                    .zip(self.key_columns.iter())
                    .all(|(identity, key)| identity == key);

            if !is_prefix {
                return Err(ValidationError::InvalidIdentityColumns(self.name.clone()));
            }
        }

        Ok(())
    }
}

/// Top-level configuration of a watermark backfill.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BackfillConfig {
    /// Maximum number of rows covered by a single chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// How long, in milliseconds, to wait for a sent marker to come back through the change log.
    #[serde(default = "default_marker_timeout_ms")]
    pub marker_timeout_ms: u64,
    /// Log position to resume tailing from, overriding any stored progress.
    #[serde(default)]
    pub resume_position: Option<u64>,
    /// Tables to backfill.
    #[serde(default)]
    pub tables: Vec<TableConfig>,
    /// Backoff used when a chunk attempt fails transiently.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Batching of streamed events.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Number of attempts for a failed destination push before the table fails.
    #[serde(default = "default_sink_push_attempts")]
    pub sink_push_attempts: u32,
    /// Source provider.
    #[serde(default)]
    pub source: SourceConfig,
    /// Destination provider.
    #[serde(default)]
    pub destination: DestinationConfig,
}

impl BackfillConfig {
    pub const DEFAULT_CHUNK_SIZE: usize = 1024;

    pub const DEFAULT_MARKER_TIMEOUT_MS: u64 = 30_000;

    pub const DEFAULT_SINK_PUSH_ATTEMPTS: u32 = 3;

    /// Creates a configuration with default settings for the given tables.
    pub fn with_tables(tables: Vec<TableConfig>) -> Self {
        Self {
            chunk_size: default_chunk_size(),
            marker_timeout_ms: default_marker_timeout_ms(),
            resume_position: None,
            tables,
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
            sink_push_attempts: default_sink_push_attempts(),
            source: SourceConfig::default(),
            destination: DestinationConfig::default(),
        }
    }

    /// Validates the whole configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.chunk_size == 0 {
            return Err(ValidationError::ChunkSizeZero);
        }

        if self.marker_timeout_ms == 0 {
            return Err(ValidationError::MarkerTimeoutZero);
        }

        if self.sink_push_attempts == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "sink_push_attempts".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.tables.is_empty() {
            return Err(ValidationError::NoTables);
        }

        let mut seen = HashSet::with_capacity(self.tables.len());
        for table in &self.tables {
            table.validate()?;

            if !seen.insert(table.name.as_str()) {
                return Err(ValidationError::DuplicateTable(table.name.clone()));
            }
        }

        self.retry.validate()?;
        self.batch.validate()?;

        Ok(())
    }
}

impl Config for BackfillConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

fn default_chunk_size() -> usize {
    BackfillConfig::DEFAULT_CHUNK_SIZE
}

fn default_marker_timeout_ms() -> u64 {
    BackfillConfig::DEFAULT_MARKER_TIMEOUT_MS
}

fn default_sink_push_attempts() -> u32 {
    BackfillConfig::DEFAULT_SINK_PUSH_ATTEMPTS
}
