//! Configuration types and loading for watermark backfills.

mod environment;
mod load;
pub mod shared;

pub use environment::{Environment, UnknownEnvironment};
pub use load::{Config, LoadConfigError, load_config, load_config_from};
