//! Core data types shared by the chunker, the tailer, the coordinator and destinations.

mod cell;
mod delivery;
mod event;
mod key;
mod position;
mod range;
mod table;
mod watermark;

pub use cell::{Cell, TableRow};
pub use delivery::{Delivery, MergedRow, RowOrigin, SnapshotRow};
pub use event::{ChangeEvent, ChangeKind, LogEntry};
pub use key::{KeyValue, PrimaryKey};
pub use position::LogPosition;
pub use range::{KeyRange, TableBounds};
pub use table::{ChunkId, TableName};
pub use watermark::{Watermark, WatermarkId, WatermarkKind, WatermarkSignal};
