//! Shared configuration types for watermark backfills.

mod backfill;
mod base;
mod batch;
mod provider;
mod retry;

pub use backfill::{BackfillConfig, TableConfig};
pub use base::ValidationError;
pub use batch::BatchConfig;
pub use provider::{DestinationConfig, SourceConfig};
pub use retry::RetryConfig;
