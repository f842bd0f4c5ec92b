//! ARRAYMETA - Write Buffer
//! Pending puts and deletes of one write session.
//! All mutations go here first and are flushed as a single fragment
//! when the session closes.

use std::collections::BTreeMap;

use crate::types::{Entry, Key, MetadataValue};

/// In-memory batch of pending entries.
/// Keeps first-touch order (which becomes on-disk order) while letting the
/// last put or delete for a key win.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    /// Pending entries in first-touch order.
    /// A `None` value represents a tombstone (deletion marker).
    entries: Vec<Entry>,
    /// Position of each key in `entries`.
    slots: BTreeMap<Key, usize>,
}

impl WriteBuffer {
    /// Create a new, empty WriteBuffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of distinct keys buffered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Buffer a put. Replaces any pending put or delete for the key.
    pub fn insert(&mut self, key: Key, value: MetadataValue) {
        self.upsert(Entry::put(key, value));
    }

    /// Buffer a tombstone. Replaces any pending put for the key.
    pub fn delete(&mut self, key: Key) {
        self.upsert(Entry::delete(key));
    }

    fn upsert(&mut self, entry: Entry) {
        match self.slots.get(&entry.key) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.slots.insert(entry.key.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Pending entries in first-touch order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Take all pending entries, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Entry> {
        self.slots.clear();
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i32) -> MetadataValue {
        MetadataValue::from_slice(&[v]).unwrap()
    }

    #[test]
    fn test_insert() {
        let mut buffer = WriteBuffer::new();
        assert!(buffer.is_empty());
        buffer.insert(b"key1".to_vec(), int(1));
        assert_eq!(buffer.entries(), &[Entry::put(b"key1".to_vec(), int(1))]);
    }

    #[test]
    fn test_last_write_wins_in_first_touch_position() {
        let mut buffer = WriteBuffer::new();
        buffer.insert(b"a".to_vec(), int(1));
        buffer.insert(b"b".to_vec(), int(2));
        buffer.insert(b"a".to_vec(), int(3));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.entries()[0], Entry::put(b"a".to_vec(), int(3)));
        assert_eq!(buffer.entries()[1].key, b"b");
    }

    #[test]
    fn test_delete_replaces_put() {
        let mut buffer = WriteBuffer::new();
        buffer.insert(b"key".to_vec(), int(5));
        buffer.delete(b"key".to_vec());
        assert_eq!(buffer.len(), 1);
        assert!(buffer.entries()[0].is_tombstone());
    }

    #[test]
    fn test_drain() {
        let mut buffer = WriteBuffer::new();
        buffer.insert(b"k1".to_vec(), int(1));
        buffer.delete(b"k2".to_vec());
        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert!(buffer.is_empty());

        // A drained key starts a fresh slot.
        buffer.insert(b"k1".to_vec(), int(2));
        assert_eq!(buffer.entries(), &[Entry::put(b"k1".to_vec(), int(2))]);
    }
}
