//! Watermark windows: buffering of concurrent changes between the low and high markers of a
//! chunk, and the per-chunk state machine driving them.

pub mod buffer;
pub mod coordinator;
pub mod router;
