//! Mapping from provider type tags to the factories building them.
//!
//! The registry is an explicit value built once, at startup, by [`ProviderRegistry::builtin`] and
//! optionally extended before the pipeline is created. Nothing registers itself globally.

use config::shared::{DestinationConfig, SourceConfig};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::bail;
use crate::destination::Destination;
use crate::destination::memory::MemoryDestination;
use crate::destination::stdout::StdoutDestination;
use crate::error::{BackfillResult, ErrorKind};
use crate::source::SourceHandle;
use crate::source::memory::MemorySource;

/// Builds a source from its configuration.
pub type SourceFactory = Arc<dyn Fn(&SourceConfig) -> BackfillResult<SourceHandle> + Send + Sync>;

/// Builds a destination from its configuration.
pub type DestinationFactory =
    Arc<dyn Fn(&DestinationConfig) -> BackfillResult<Arc<dyn Destination>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    sources: HashMap<String, SourceFactory>,
    destinations: HashMap<String, DestinationFactory>,
}

impl ProviderRegistry {
    /// Creates a registry without any provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the providers shipped with the crate: the `memory` source and
    /// the `memory` and `stdout` destinations.
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register_source("memory", |_| {
            Ok(SourceHandle::from_source(MemorySource::new()))
        });

        registry.register_destination("memory", |_| {
            Ok(Arc::new(MemoryDestination::new()) as Arc<dyn Destination>)
        });
        registry.register_destination("stdout", |config| {
            let DestinationConfig::Stdout { show_data } = config else {
                bail!(
                    ErrorKind::ConfigError,
                    "Destination configuration does not match its provider",
                    format!("The 'stdout' provider cannot be built from {config:?}")
                );
            };

            Ok(Arc::new(StdoutDestination::new(*show_data)) as Arc<dyn Destination>)
        });

        registry
    }

    /// Registers `factory` for the source type `tag`, replacing any previous factory.
    pub fn register_source<F>(&mut self, tag: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&SourceConfig) -> BackfillResult<SourceHandle> + Send + Sync + 'static,
    {
        let tag = tag.into();
        debug!(%tag, "registering source provider");
        self.sources.insert(tag, Arc::new(factory));

        self
    }

    /// Registers `factory` for the destination type `tag`, replacing any previous factory.
    pub fn register_destination<F>(&mut self, tag: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&DestinationConfig) -> BackfillResult<Arc<dyn Destination>> + Send + Sync + 'static,
    {
        let tag = tag.into();
        debug!(%tag, "registering destination provider");
        self.destinations.insert(tag, Arc::new(factory));

        self
    }

    pub fn build_source(&self, config: &SourceConfig) -> BackfillResult<SourceHandle> {
        let tag = config.type_tag();
        let Some(factory) = self.sources.get(tag) else {
            bail!(
                ErrorKind::ConfigError,
                "Unknown source provider",
                format!("No source provider is registered for type '{tag}'")
            );
        };

        factory(config)
    }

    pub fn build_destination(
        &self,
        config: &DestinationConfig,
    ) -> BackfillResult<Arc<dyn Destination>> {
        let tag = config.type_tag();
        let Some(factory) = self.destinations.get(tag) else {
            bail!(
                ErrorKind::ConfigError,
                "Unknown destination provider",
                format!("No destination provider is registered for type '{tag}'")
            );
        };

        factory(config)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sources: Vec<_> = self.sources.keys().collect();
        sources.sort();
        let mut destinations: Vec<_> = self.destinations.keys().collect();
        destinations.sort();

        f.debug_struct("ProviderRegistry")
            .field("sources", &sources)
            .field("destinations", &destinations)
            .finish()
    }
}
