//! Concurrency utilities for coordinating table workers.
//!
//! The [`shutdown`] module implements a broadcast shutdown: a single signal reaches every table
//! worker and its tailer task, and workers react to it between state transitions so that an
//! interrupted chunk is simply retried on the next start.

pub mod shutdown;
