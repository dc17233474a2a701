use serde::Serialize;
use std::fmt;

use crate::types::PrimaryKey;

/// Half-open slice `(lower, upper]` of a table's primary-key domain.
///
/// A missing lower bound means the range starts at the beginning of the domain. Consecutive
/// ranges produced by the chunker share a bound, so together they cover the domain without gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyRange {
    pub lower: Option<PrimaryKey>,
    pub upper: PrimaryKey,
}

impl KeyRange {
    pub fn new(lower: Option<PrimaryKey>, upper: PrimaryKey) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, key: &PrimaryKey) -> bool {
        let above_lower = match &self.lower {
            Some(lower) => key > lower,
            None => true,
        };

        above_lower && key <= &self.upper
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lower {
            Some(lower) => write!(f, "({lower}, {}]", self.upper),
            None => write!(f, "(-inf, {}]", self.upper),
        }
    }
}

/// Key-space descriptor of a table as reported by storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBounds {
    pub min: PrimaryKey,
    pub max: PrimaryKey,
    pub approximate_rows: u64,
}
