use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::types::{ChangeEvent, PrimaryKey};

/// Latest change per key observed inside one open window.
///
/// Only the entry with the highest log position is kept for a key, whatever the arrival order or
/// the kind of the change. A buffer lives for exactly one window and is dropped after its merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkBuffer {
    events: HashMap<PrimaryKey, ChangeEvent>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `event`, replacing the entry of the same key if `event` is more recent.
    ///
    /// Returns `true` when the buffer changed.
    pub fn record(&mut self, event: ChangeEvent) -> bool {
        match self.events.entry(event.key.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(event);
                true
            }
            Entry::Occupied(mut entry) => {
                if event.position > entry.get().position {
                    entry.insert(event);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn get(&self, key: &PrimaryKey) -> Option<&ChangeEvent> {
        self.events.get(key)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeEvent> {
        self.events.values()
    }
}

impl FromIterator<ChangeEvent> for ChunkBuffer {
    fn from_iter<I: IntoIterator<Item = ChangeEvent>>(iter: I) -> Self {
        let mut buffer = ChunkBuffer::new();
        for event in iter {
            buffer.record(event);
        }
        buffer
    }
}
