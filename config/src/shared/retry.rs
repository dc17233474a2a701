use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Exponential backoff applied when a chunk attempt fails with a transient error.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of attempts for a single chunk, the first attempt included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for the delay between two retries, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Factor by which the delay grows after each failed attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl RetryConfig {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    pub const DEFAULT_INITIAL_DELAY_MS: u64 = 500;

    pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

    pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

    /// Validates retry configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "retry.max_attempts".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.backoff_factor < 1.0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "retry.backoff_factor".to_string(),
                constraint: "must be at least 1.0".to_string(),
            });
        }

        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: "retry.initial_delay_ms".to_string(),
                constraint: "must not exceed `retry.max_delay_ms`".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_max_attempts() -> u32 {
    RetryConfig::DEFAULT_MAX_ATTEMPTS
}

fn default_initial_delay_ms() -> u64 {
    RetryConfig::DEFAULT_INITIAL_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    RetryConfig::DEFAULT_MAX_DELAY_MS
}

fn default_backoff_factor() -> f64 {
    RetryConfig::DEFAULT_BACKOFF_FACTOR
}
