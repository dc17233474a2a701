//! Tracing setup shared by backfill binaries and tests.

pub mod tracing;
