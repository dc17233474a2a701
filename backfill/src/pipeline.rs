use config::shared::BackfillConfig;
use std::sync::Arc;
use tracing::{error, info};

use crate::arena::{TableArena, TableHandle};
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::destination::Destination;
use crate::error::BackfillResult;
use crate::registry::ProviderRegistry;
use crate::source::SourceHandle;
use crate::store::ProgressStore;
use crate::workers::pool::TableWorkerPool;
use crate::workers::table::{TableWorker, TableWorkerState};

#[derive(Debug)]
enum PipelineState {
    NotStarted,
    Started { pool: TableWorkerPool },
}

/// Backfills every configured table, then keeps streaming their changes until shutdown.
pub struct Pipeline {
    config: Arc<BackfillConfig>,
    arena: Arc<TableArena>,
    source: SourceHandle,
    destination: Arc<dyn Destination>,
    progress_store: Arc<dyn ProgressStore>,
    state: PipelineState,
    shutdown_tx: ShutdownTx,
}

impl Pipeline {
    /// Creates a pipeline from already built collaborators.
    ///
    /// Fails with [`crate::error::ErrorKind::ConfigError`] if `config` is invalid.
    pub fn new(
        config: BackfillConfig,
        source: SourceHandle,
        destination: Arc<dyn Destination>,
        progress_store: Arc<dyn ProgressStore>,
    ) -> BackfillResult<Self> {
        config.validate()?;
        let arena = TableArena::from_config(&config.tables)?;

        // Receivers are taken from the sender when workers start.
        let (shutdown_tx, _) = create_shutdown_channel();

        Ok(Self {
            config: Arc::new(config),
            arena: Arc::new(arena),
            source,
            destination,
            progress_store,
            state: PipelineState::NotStarted,
            shutdown_tx,
        })
    }

    /// Creates a pipeline whose source and destination are built by `registry` from the
    /// configured provider type tags.
    pub fn from_registry(
        config: BackfillConfig,
        registry: &ProviderRegistry,
        progress_store: Arc<dyn ProgressStore>,
    ) -> BackfillResult<Self> {
        let source = registry.build_source(&config.source)?;
        let destination = registry.build_destination(&config.destination)?;

        Self::new(config, source, destination, progress_store)
    }

    pub fn arena(&self) -> &TableArena {
        &self.arena
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Spawns one worker per configured table.
    pub async fn start(&mut self) -> BackfillResult<()> {
        if let PipelineState::Started { .. } = self.state {
            info!("pipeline was already started");

            return Ok(());
        }

        info!(tables = self.arena.len(), "starting backfill pipeline");

        let pool = TableWorkerPool::new();
        for (handle, descriptor) in self.arena.iter() {
            let worker = TableWorker::new(
                handle,
                descriptor.clone(),
                self.config.clone(),
                self.source.clone(),
                self.destination.clone(),
                self.progress_store.clone(),
                self.shutdown_tx.subscribe(),
            );

            worker.spawn_into_pool(&pool).await;
        }

        self.state = PipelineState::Started { pool };

        Ok(())
    }

    /// Returns the state of the running worker of `handle`, if any.
    pub async fn worker_state(&self, handle: TableHandle) -> Option<TableWorkerState> {
        let PipelineState::Started { pool } = &self.state else {
            return None;
        };

        pool.lock().await.get_active_worker_state(handle)
    }

    /// Waits for every table worker to stop, then shuts the destination down.
    ///
    /// Errors of all failed tables are returned together.
    pub async fn wait(self) -> BackfillResult<()> {
        let PipelineState::Started { pool } = self.state else {
            info!("pipeline was not started, nothing to wait for");

            return Ok(());
        };

        info!("waiting for table workers to complete");

        let mut errors = vec![];

        if let Err(err) = pool.wait_all().await {
            // We naively use the `kinds` as number of errors.
            let errors_number = err.kinds().len();
            errors.push(err);

            info!("{} table workers failed with an error", errors_number);
        }

        if let Err(err) = self.destination.shutdown().await {
            error!(destination = self.destination.name(), error = %err, "failed to shut down destination");
            errors.push(err);
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }

    pub fn shutdown(&self) {
        info!("trying to shut down the pipeline");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the pipeline: {}", err);
            return;
        }

        info!("shut down signal successfully sent to all workers");
    }

    pub async fn shutdown_and_wait(self) -> BackfillResult<()> {
        self.shutdown();
        self.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::memory::MemoryProgressStore;

    #[test]
    fn invalid_config_is_rejected() {
        let config = BackfillConfig::with_tables(vec![]);

        let result = Pipeline::from_registry(
            config,
            &ProviderRegistry::builtin(),
            Arc::new(MemoryProgressStore::new()),
        );

        let Err(err) = result else {
            panic!("expected the configuration to be rejected");
        };
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn waiting_on_unstarted_pipeline_is_a_noop() {
        let config = BackfillConfig::with_tables(vec![config::shared::TableConfig {
            name: "users".to_string(),
            key_columns: vec!["id".to_string()],
            identity_columns: None,
        }]);

        let pipeline = Pipeline::from_registry(
            config,
            &ProviderRegistry::builtin(),
            Arc::new(MemoryProgressStore::new()),
        )
        .unwrap_or_else(|err| panic!("pipeline creation failed: {err}"));

        assert_eq!(pipeline.arena().len(), 1);
        pipeline.wait().await.unwrap();
    }
}
