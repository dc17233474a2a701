use serde::Serialize;
use std::fmt;

/// Position of an entry in the ordered change log.
///
/// Positions are strictly increasing in log order. [`LogPosition::ZERO`] precedes every entry,
/// so streaming from it replays the whole log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct LogPosition(pub u64);

impl LogPosition {
    pub const ZERO: LogPosition = LogPosition(0);

    pub fn next(self) -> LogPosition {
        LogPosition(self.0.saturating_add(1))
    }
}

impl From<u64> for LogPosition {
    fn from(value: u64) -> Self {
        LogPosition(value)
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
