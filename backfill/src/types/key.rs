use serde::Serialize;
use std::fmt;

/// One component of a primary key.
///
/// Ordering follows the derived order, which compares variants first and values second, so keys
/// of a table must use the same variant per column to get a meaningful domain order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(value) => write!(f, "{value}"),
            KeyValue::Text(value) => write!(f, "'{value}'"),
            KeyValue::Bytes(value) => write!(f, "<{} bytes>", value.len()),
        }
    }
}

/// Primary key of a row, compared lexicographically component by component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PrimaryKey(Vec<KeyValue>);

impl PrimaryKey {
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    /// Returns the first `len` components, or the whole key when it is shorter.
    pub fn prefix(&self, len: usize) -> &[KeyValue] {
        &self.0[..len.min(self.0.len())]
    }

    /// Returns `true` when both keys belong to the same identity group of `len` components.
    pub fn shares_prefix(&self, other: &PrimaryKey, len: usize) -> bool {
        self.prefix(len) == other.prefix(len)
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        Self(vec![KeyValue::Int(value)])
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        Self(vec![KeyValue::Text(value.to_string())])
    }
}

impl From<Vec<KeyValue>> for PrimaryKey {
    fn from(values: Vec<KeyValue>) -> Self {
        Self(values)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (index, value) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, ")")
    }
}
