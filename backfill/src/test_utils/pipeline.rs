use config::shared::BackfillConfig;
use std::sync::Arc;

use crate::pipeline::Pipeline;
use crate::source::SourceHandle;
use crate::source::memory::MemorySource;
use crate::test_utils::notifying_destination::NotifyingDestination;
use crate::test_utils::notifying_store::NotifyingProgressStore;

/// Creates a pipeline reading from `source` and writing to `destination`.
///
/// # Panics
///
/// Panics if `config` is invalid.
pub fn create_pipeline(
    config: BackfillConfig,
    source: &MemorySource,
    destination: &NotifyingDestination,
    store: &NotifyingProgressStore,
) -> Pipeline {
    Pipeline::new(
        config,
        SourceHandle::from_source(source.clone()),
        Arc::new(destination.clone()),
        Arc::new(store.clone()),
    )
    .unwrap_or_else(|err| panic!("invalid test pipeline configuration: {err}"))
}
