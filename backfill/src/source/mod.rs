pub mod base;
pub mod memory;

pub use base::{ChangeLog, LogStream, SourceHandle, TableStorage};
