use serde::{Deserialize, Serialize};

/// Source providers, selected by type tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfig {
    /// An in-process table store with its own ordered change log.
    #[default]
    Memory,
}

impl SourceConfig {
    /// Returns the type tag used to look up the provider factory.
    pub fn type_tag(&self) -> &'static str {
        match self {
            SourceConfig::Memory => "memory",
        }
    }
}

/// Destination providers, selected by type tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationConfig {
    /// Keeps every delivered batch in memory.
    #[default]
    Memory,
    /// Writes every delivery as a JSON line to standard output.
    Stdout {
        /// Whether row values are included in the output.
        #[serde(default)]
        show_data: bool,
    },
}

impl DestinationConfig {
    /// Returns the type tag used to look up the provider factory.
    pub fn type_tag(&self) -> &'static str {
        match self {
            DestinationConfig::Memory => "memory",
            DestinationConfig::Stdout { .. } => "stdout",
        }
    }
}
