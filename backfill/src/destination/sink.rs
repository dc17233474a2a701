use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::backfill_error;
use crate::destination::Destination;
use crate::error::{BackfillResult, ErrorKind};
use crate::metrics::{
    BACKFILL_DESTINATION_PUSH_FAILURES_TOTAL, DESTINATION_LABEL, TABLE_NAME_LABEL,
};
use crate::types::{Delivery, TableName};

/// Pushes the deliveries of one table, retrying failed pushes with the same batch.
#[derive(Clone)]
pub struct DeliverySink {
    destination: Arc<dyn Destination>,
    table: TableName,
    attempts: u32,
    retry_delay: Duration,
}

impl DeliverySink {
    pub fn new(
        destination: Arc<dyn Destination>,
        table: TableName,
        attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            destination,
            table,
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    /// Pushes `batch`, giving up with [`ErrorKind::DestinationPushFailed`] once every attempt
    /// failed. Empty batches are not pushed.
    pub async fn deliver(&self, batch: Vec<Delivery>) -> BackfillResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut attempt = 1;
        loop {
            let err = match self.destination.push(batch.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            counter!(
                BACKFILL_DESTINATION_PUSH_FAILURES_TOTAL,
                TABLE_NAME_LABEL => self.table.to_string(),
                DESTINATION_LABEL => self.destination.name(),
            )
            .increment(1);

            if attempt >= self.attempts {
                return Err(backfill_error!(
                    ErrorKind::DestinationPushFailed,
                    "Destination rejected batch",
                    format!(
                        "Pushing {} deliveries of table '{}' to '{}' failed {} times",
                        batch.len(),
                        self.table,
                        self.destination.name(),
                        attempt
                    ),
                    source: err
                ));
            }

            warn!(
                table = %self.table,
                destination = self.destination.name(),
                attempt,
                error = %err,
                "push failed, retrying",
            );

            tokio::time::sleep(self.retry_delay * attempt).await;
            attempt += 1;
        }
    }
}
