//! Ownership of table descriptors.
//!
//! Every descriptor lives in the [`TableArena`]; workers, the pool and progress entries refer to
//! tables by [`TableHandle`] or by name only.

use config::shared::TableConfig;
use std::fmt;

use crate::bail;
use crate::error::{BackfillResult, ErrorKind};
use crate::types::TableName;

/// Opaque index of a table in a [`TableArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableHandle(u32);

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Static description of a table taking part in the backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: TableName,
    pub key_columns: Vec<String>,
    /// Number of leading key columns forming a group that is never split across chunks.
    pub identity_prefix_len: usize,
}

impl From<&TableConfig> for TableDescriptor {
    fn from(config: &TableConfig) -> Self {
        Self {
            name: TableName::new(config.name.clone()),
            key_columns: config.key_columns.clone(),
            identity_prefix_len: config.identity_prefix_len(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TableArena {
    tables: Vec<TableDescriptor>,
}

impl TableArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an arena holding one descriptor per configured table, in configuration order.
    pub fn from_config(tables: &[TableConfig]) -> BackfillResult<Self> {
        let mut arena = Self::new();
        for table in tables {
            arena.insert(TableDescriptor::from(table))?;
        }

        Ok(arena)
    }

    /// Adds `descriptor` and returns its handle.
    ///
    /// Fails with [`ErrorKind::ConfigError`] if a table with the same name already exists.
    pub fn insert(&mut self, descriptor: TableDescriptor) -> BackfillResult<TableHandle> {
        if self.handle_of(&descriptor.name).is_some() {
            bail!(
                ErrorKind::ConfigError,
                "Duplicate table",
                format!("The table '{}' was registered twice", descriptor.name)
            );
        }

        let Ok(index) = u32::try_from(self.tables.len()) else {
            bail!(ErrorKind::ConfigError, "Too many tables");
        };

        self.tables.push(descriptor);

        Ok(TableHandle(index))
    }

    pub fn get(&self, handle: TableHandle) -> Option<&TableDescriptor> {
        self.tables.get(handle.0 as usize)
    }

    pub fn handle_of(&self, name: &TableName) -> Option<TableHandle> {
        self.tables
            .iter()
            .position(|descriptor| &descriptor.name == name)
            .map(|index| TableHandle(index as u32))
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableHandle, &TableDescriptor)> {
        self.tables
            .iter()
            .enumerate()
            .map(|(index, descriptor)| (TableHandle(index as u32), descriptor))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
