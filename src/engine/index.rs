//! ARRAYMETA - Metadata Index
//! The read-side view of an array's metadata: every fragment visible at
//! the session timestamp replayed oldest to newest into one map.
//!
//! The index is rebuilt from scratch whenever the visible fragment set
//! changes and is never mutated after `build` returns.

use std::collections::BTreeMap;

use crate::error::{ArrayMetaError, Result};
use crate::types::{Entry, Key, MetadataValue};

#[derive(Debug, Clone)]
struct Slot {
    value: MetadataValue,
    /// Replay position at which the key (re)appeared in the map.
    rank: u64,
}

/// Key -> latest value, with ordinal access in replay order.
#[derive(Debug, Clone, Default)]
pub struct MetadataIndex {
    entries: BTreeMap<Key, Slot>,
    /// Keys sorted by rank.
    ordinal: Vec<Key>,
}

impl MetadataIndex {
    /// An index with no entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay fragments, each given in its on-disk entry order, in
    /// ascending timestamp order.
    ///
    /// - a tombstone removes its key (no-op if absent)
    /// - a put on an absent key takes the next rank
    /// - a put on a present key replaces the value and keeps the rank
    pub fn build<I, F>(fragments: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: IntoIterator<Item = Entry>,
    {
        let mut entries: BTreeMap<Key, Slot> = BTreeMap::new();
        let mut next_rank = 0u64;

        for fragment in fragments {
            for entry in fragment {
                match entry.value {
                    None => {
                        entries.remove(&entry.key);
                    }
                    Some(value) => match entries.get_mut(&entry.key) {
                        Some(slot) => slot.value = value,
                        None => {
                            entries.insert(
                                entry.key,
                                Slot {
                                    value,
                                    rank: next_rank,
                                },
                            );
                            next_rank += 1;
                        }
                    },
                }
            }
        }

        let mut ranked: Vec<(&Key, u64)> = entries.iter().map(|(k, s)| (k, s.rank)).collect();
        ranked.sort_unstable_by_key(|(_, rank)| *rank);
        let ordinal = ranked.into_iter().map(|(k, _)| k.clone()).collect();

        Self { entries, ordinal }
    }

    /// Look up the live value of `key`. `None` means no such key.
    pub fn get(&self, key: &[u8]) -> Option<&MetadataValue> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Entry at replay-order position `index`.
    pub fn get_by_ordinal(&self, index: u64) -> Result<(&[u8], &MetadataValue)> {
        let key = usize::try_from(index)
            .ok()
            .and_then(|i| self.ordinal.get(i))
            .ok_or(ArrayMetaError::OutOfRange {
                index,
                count: self.len() as u64,
            })?;
        // Every ordinal key is present in `entries` by construction.
        let slot = self.entries.get(key).ok_or_else(|| {
            ArrayMetaError::Corruption(format!("ordinal key {:?} missing from index", key))
        })?;
        Ok((key.as_slice(), &slot.value))
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate live entries in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &MetadataValue)> + '_ {
        self.ordinal.iter().filter_map(move |key| {
            self.entries
                .get(key)
                .map(|slot| (key.as_slice(), &slot.value))
        })
    }

    /// Live entries in ordinal order, ready to be written as one fragment.
    pub fn to_entries(&self) -> Vec<Entry> {
        self.iter()
            .map(|(key, value)| Entry::put(key.to_vec(), value.clone()))
            .collect()
    }
}
