use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Batching of streamed change events delivered outside of any chunk window.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of streamed events in a single push to the destination.
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
    /// Maximum time, in milliseconds, to wait for a batch to fill before pushing it.
    #[serde(default = "default_batch_max_fill_ms")]
    pub max_fill_ms: u64,
}

impl BatchConfig {
    /// Default maximum batch size for streamed events.
    pub const DEFAULT_MAX_SIZE: usize = 1000;

    /// Default maximum fill time in milliseconds.
    pub const DEFAULT_MAX_FILL_MS: u64 = 100;

    /// Validates batch configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
            max_fill_ms: default_batch_max_fill_ms(),
        }
    }
}

fn default_batch_max_size() -> usize {
    BatchConfig::DEFAULT_MAX_SIZE
}

fn default_batch_max_fill_ms() -> u64 {
    BatchConfig::DEFAULT_MAX_FILL_MS
}
