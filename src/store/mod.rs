//! Storage backends
//!
//! This module defines the KvStore trait and various implementations.

pub mod shm;
pub mod sled;

use crate::key::Key;
use std::collections::HashMap;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("store is full")]
    StoreFull,

    #[error("backing store process exited during startup: {0}")]
    Startup(std::process::ExitStatus),

    #[error("invalid state: {0}")]
    State(String),

    #[error("invalid key: {0}")]
    KeyType(String),

    #[error("keys and values must be of the same length ({keys} != {values})")]
    LengthMismatch { keys: usize, values: usize },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value store trait - the core abstraction for storage backends.
///
/// Values at this boundary are raw bytes; typed access goes through a
/// [`crate::codec::Codec`]. Absence is never an error: `get` on a missing
/// key returns `Ok(None)`.
pub trait KvStore {
    /// Attach to the backing store. Required before any data operation.
    fn connect(&mut self) -> StoreResult<()>;

    /// Detach from the backing store. The instance is not reusable afterwards.
    fn disconnect(&mut self) -> StoreResult<()>;

    /// Tear down backing resources (process, socket, files).
    fn cleanup(&mut self) -> StoreResult<()>;

    /// Store a value under a key. If the key is already present the call is
    /// a silent no-op (first-writer-wins); use [`KvStore::replace`] to
    /// overwrite.
    fn put(&mut self, key: &Key, value: &[u8]) -> StoreResult<()>;

    /// Fetch the value for a key, or `None` if absent.
    fn get(&self, key: &Key) -> StoreResult<Option<Vec<u8>>>;

    /// Batch-delete the given keys. Missing keys are ignored.
    fn delete(&mut self, keys: &[Key]) -> StoreResult<()>;

    /// Membership test, no error on absence.
    fn contains(&self, key: &Key) -> StoreResult<bool>;

    /// Number of currently stored objects.
    fn len(&self) -> StoreResult<usize>;

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Lazy iteration over a point-in-time snapshot of the store. Entries
    /// deleted after the snapshot was taken are skipped; later writes are
    /// not observed. Calling again re-snapshots.
    fn iter(&self) -> StoreResult<Box<dyn Iterator<Item = StoreResult<(Key, Vec<u8>)>> + '_>>;

    /// All keys, materialized from a snapshot.
    fn keys(&self) -> StoreResult<Vec<Key>> {
        self.iter()?.map(|entry| entry.map(|(k, _)| k)).collect()
    }

    /// All values, materialized from a snapshot.
    fn values(&self) -> StoreResult<Vec<Vec<u8>>> {
        self.iter()?.map(|entry| entry.map(|(_, v)| v)).collect()
    }

    /// Per-key independent gets; absent keys are omitted from the result.
    fn get_multi(&self, keys: &[Key]) -> StoreResult<HashMap<Key, Vec<u8>>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Apply `put` semantics per pair. Validates the lengths before any
    /// write, so a mismatch leaves the store unchanged.
    fn set_multi(&mut self, keys: &[Key], values: &[Vec<u8>]) -> StoreResult<()> {
        if keys.len() != values.len() {
            return Err(StoreError::LengthMismatch {
                keys: keys.len(),
                values: values.len(),
            });
        }
        for (key, value) in keys.iter().zip(values) {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Overwrite the value for a key, whether or not it already exists.
    /// Deliberately differs from `put`'s first-writer-wins policy.
    fn replace(&mut self, key: &Key, value: &[u8]) -> StoreResult<()> {
        self.delete(std::slice::from_ref(key))?;
        self.put(key, value)
    }
}

// Re-export backends
pub use self::shm::{ShmKvStore, ShmStoreConfig};
pub use self::sled::SledKvStore;
