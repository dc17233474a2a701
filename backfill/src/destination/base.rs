use crate::error::BackfillResult;
use crate::types::Delivery;

/// Trait for systems receiving the output of a backfill.
///
/// A destination receives rows merged by completed chunks and changes streamed outside of any
/// window, in log order per table. Delivery is at-least-once: after a restart, rows and changes
/// may be pushed again, so implementations should apply them idempotently by key.
///
/// Failed pushes are retried by the caller with the same batch; implementations should not retry
/// internally.
#[async_trait::async_trait]
pub trait Destination: Send + Sync {
    /// Returns the name of the destination.
    fn name(&self) -> &'static str;

    /// Pushes a batch of deliveries, all belonging to the same table.
    async fn push(&self, batch: Vec<Delivery>) -> BackfillResult<()>;

    /// Propagates the shutdown signal to the destination.
    ///
    /// Override this method if the destination needs to flush or release resources when the
    /// pipeline shuts down. The default implementation is a no-op.
    async fn shutdown(&self) -> BackfillResult<()> {
        Ok(())
    }
}
