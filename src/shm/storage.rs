//! In-memory object store engine
//!
//! Holds immutable objects addressed by fixed-width ids and enforces the
//! configured capacity budget with exact byte accounting.

use super::protocol::ObjectEntry;
use crate::key::ObjectId;
use std::collections::HashMap;

/// A stored object: opaque metadata (the encoded key) plus the value bytes.
/// Objects are never mutated in place; a write is a fresh put or an explicit
/// delete followed by a put.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub meta: Vec<u8>,
    pub data: Vec<u8>,
}

impl StoredObject {
    fn size(&self) -> u64 {
        (self.meta.len() + self.data.len()) as u64
    }
}

/// Outcome of a put
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The object was stored
    Stored,
    /// An object with this id already exists; nothing was written
    AlreadyStored,
    /// The store lacks capacity for the object; nothing was written
    Full,
}

/// Capacity-budgeted object store
pub struct ObjectStore {
    capacity: u64,
    used: u64,
    objects: HashMap<ObjectId, StoredObject>,
}

impl ObjectStore {
    /// Create a store with the given capacity in bytes
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: 0,
            objects: HashMap::new(),
        }
    }

    /// Store an object under an id, first-writer-wins
    pub fn put(&mut self, id: ObjectId, meta: Vec<u8>, data: Vec<u8>) -> PutOutcome {
        if self.objects.contains_key(&id) {
            return PutOutcome::AlreadyStored;
        }

        let object = StoredObject { meta, data };
        if self.used + object.size() > self.capacity {
            return PutOutcome::Full;
        }

        self.used += object.size();
        self.objects.insert(id, object);
        PutOutcome::Stored
    }

    /// Fetch an object by id
    pub fn get(&self, id: &ObjectId) -> Option<&StoredObject> {
        self.objects.get(id)
    }

    /// Check if an id is present
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Remove a batch of objects. Missing ids are ignored.
    pub fn remove(&mut self, ids: &[ObjectId]) {
        for id in ids {
            if let Some(object) = self.objects.remove(id) {
                self.used -= object.size();
                log::debug!("deleted object {}", id);
            }
        }
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Listing of all ids with their stored sizes
    pub fn entries(&self) -> Vec<ObjectEntry> {
        self.objects
            .iter()
            .map(|(id, object)| ObjectEntry {
                id: *id,
                data_size: object.data.len() as u64,
                meta_size: object.meta.len() as u64,
            })
            .collect()
    }

    /// Configured capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes currently accounted to stored objects
    pub fn used(&self) -> u64 {
        self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    fn id(name: &str) -> ObjectId {
        ObjectId::for_key(&Key::from(name))
    }

    #[test]
    fn test_put_and_get() {
        let mut store = ObjectStore::new(1024);
        assert_eq!(
            store.put(id("a"), b"meta".to_vec(), b"data".to_vec()),
            PutOutcome::Stored
        );

        let object = store.get(&id("a")).unwrap();
        assert_eq!(object.meta, b"meta");
        assert_eq!(object.data, b"data");
        assert_eq!(store.used(), 8);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_first_writer_wins() {
        let mut store = ObjectStore::new(1024);
        store.put(id("a"), Vec::new(), b"first".to_vec());
        assert_eq!(
            store.put(id("a"), Vec::new(), b"second".to_vec()),
            PutOutcome::AlreadyStored
        );

        // The original value is untouched and accounting did not change
        assert_eq!(store.get(&id("a")).unwrap().data, b"first");
        assert_eq!(store.used(), 5);
    }

    #[test]
    fn test_capacity_rejection() {
        let mut store = ObjectStore::new(10);
        assert_eq!(
            store.put(id("big"), Vec::new(), vec![0u8; 11]),
            PutOutcome::Full
        );
        assert!(store.is_empty());
        assert_eq!(store.used(), 0);

        // An object that fits exactly is accepted
        assert_eq!(
            store.put(id("fit"), Vec::new(), vec![0u8; 10]),
            PutOutcome::Stored
        );
        assert_eq!(store.used(), 10);
    }

    #[test]
    fn test_remove_frees_capacity() {
        let mut store = ObjectStore::new(10);
        store.put(id("a"), Vec::new(), vec![0u8; 10]);
        assert_eq!(store.put(id("b"), Vec::new(), vec![1u8]), PutOutcome::Full);

        store.remove(&[id("a"), id("missing")]);
        assert_eq!(store.used(), 0);
        assert_eq!(store.put(id("b"), Vec::new(), vec![1u8]), PutOutcome::Stored);
    }

    #[test]
    fn test_entries_listing() {
        let mut store = ObjectStore::new(1024);
        store.put(id("a"), b"k".to_vec(), b"vvv".to_vec());
        store.put(id("b"), b"kk".to_vec(), b"v".to_vec());

        let mut entries = store.entries();
        entries.sort_by_key(|e| e.data_size);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, id("b"));
        assert_eq!(entries[0].data_size, 1);
        assert_eq!(entries[0].meta_size, 2);
        assert_eq!(entries[1].data_size, 3);
    }
}
