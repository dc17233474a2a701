pub mod base;
pub mod memory;
pub mod sink;
pub mod stdout;

pub use base::Destination;
