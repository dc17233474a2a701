//! Utilities for testing backfill pipelines against in-memory collaborators.
//!
//! - [`table`] seeds memory sources and builds test configurations.
//! - [`notifying_destination`] wraps a [`crate::destination::memory::MemoryDestination`] and
//!   notifies tests once the delivered rows satisfy a condition.
//! - [`notifying_store`] does the same for stored table progress.
//! - [`pipeline`] creates pipelines over those collaborators.
//! - [`notify`] provides [`notify::TimedNotify`], which fails a test instead of hanging it.

#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod notify;
pub mod notifying_destination;
pub mod notifying_store;
pub mod pipeline;
pub mod table;
