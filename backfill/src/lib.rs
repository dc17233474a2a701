//! Watermark based chunked backfill running alongside a live change stream.
//!
//! A table's primary-key domain is split into bounded, ascending chunks. For every chunk a low
//! marker is injected into the change log, the chunk is read from storage, and a high marker is
//! injected. Changes observed between the two markers are buffered and reconciled with the
//! snapshot read so that each row is emitted with its most recent value, without locking the
//! source table. Once every chunk is done the table hands off to pure streaming from the same log
//! position.
//!
//! The entry point is [`pipeline::Pipeline`], which spawns one worker per configured table.

pub mod arena;
pub mod chunker;
pub mod concurrency;
pub mod destination;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
mod macros;
pub mod merge;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod source;
pub mod state;
pub mod store;
pub mod tailer;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod watermark;
pub mod workers;
