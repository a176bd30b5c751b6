//! Embedded-database backend
//!
//! Same operation surface as the shared-memory backend, over a local sled
//! tree. No capacity budget; the tree grows with the filesystem. Encoded key
//! tags are the tree keys, so iteration recovers the original keys without a
//! side index.

use crate::key::Key;
use crate::store::{KvStore, StoreError, StoreResult};
use std::path::{Path, PathBuf};

fn backend_err(e: sled::Error) -> StoreError {
    StoreError::Backend(format!("sled: {}", e))
}

/// Key-value store backed by an embedded sled database
pub struct SledKvStore {
    path: PathBuf,
    db: Option<sled::Db>,
}

impl SledKvStore {
    /// Open (or create) the database directory
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path).map_err(backend_err)?;
        Ok(Self { path, db: Some(db) })
    }

    fn db(&self) -> StoreResult<&sled::Db> {
        self.db.as_ref().ok_or_else(|| {
            StoreError::State("embedded store is closed; open a fresh instance".to_string())
        })
    }

    /// Sync pending writes to disk
    pub fn flush(&self) -> StoreResult<()> {
        self.db()?.flush().map_err(backend_err)?;
        Ok(())
    }

    /// Remove a key, returning its value if it was present
    pub fn pop(&mut self, key: &Key) -> StoreResult<Option<Vec<u8>>> {
        let old = self.db()?.remove(key.encode()?).map_err(backend_err)?;
        Ok(old.map(|ivec| ivec.to_vec()))
    }
}

impl KvStore for SledKvStore {
    /// The database is attached at construction; this only verifies it is
    /// still open.
    fn connect(&mut self) -> StoreResult<()> {
        self.db()?;
        Ok(())
    }

    /// Flush and close the database. Operations afterwards fail fast.
    fn disconnect(&mut self) -> StoreResult<()> {
        self.flush()?;
        self.db = None;
        Ok(())
    }

    /// Close the database and delete its directory
    fn cleanup(&mut self) -> StoreResult<()> {
        if self.db.is_some() {
            self.flush()?;
            self.db = None;
        }
        if self.path.exists() {
            std::fs::remove_dir_all(&self.path)?;
        }
        Ok(())
    }

    fn put(&mut self, key: &Key, value: &[u8]) -> StoreResult<()> {
        // compare-and-swap from empty keeps first-writer-wins; a lost race
        // or an existing value is a silent no-op, matching the shared-memory
        // backend.
        let _ = self
            .db()?
            .compare_and_swap(key.encode()?, None::<&[u8]>, Some(value))
            .map_err(backend_err)?;
        Ok(())
    }

    fn get(&self, key: &Key) -> StoreResult<Option<Vec<u8>>> {
        let value = self.db()?.get(key.encode()?).map_err(backend_err)?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn delete(&mut self, keys: &[Key]) -> StoreResult<()> {
        let db = self.db()?;
        for key in keys {
            db.remove(key.encode()?).map_err(backend_err)?;
        }
        Ok(())
    }

    fn contains(&self, key: &Key) -> StoreResult<bool> {
        self.db()?.contains_key(key.encode()?).map_err(backend_err)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.db()?.len())
    }

    fn iter(&self) -> StoreResult<Box<dyn Iterator<Item = StoreResult<(Key, Vec<u8>)>> + '_>> {
        // Snapshot the key set, then resolve each lazily; entries removed
        // after the snapshot are skipped.
        let db = self.db()?;
        let snapshot: Vec<Vec<u8>> = db
            .iter()
            .keys()
            .map(|entry| entry.map(|ivec| ivec.to_vec()).map_err(backend_err))
            .collect::<StoreResult<_>>()?;
        Ok(Box::new(snapshot.into_iter().filter_map(move |raw| {
            let key = match Key::decode(&raw) {
                Ok(key) => key,
                Err(e) => return Some(Err(e)),
            };
            match db.get(&raw) {
                Ok(Some(value)) => Some(Ok((key, value.to_vec()))),
                Ok(None) => None,
                Err(e) => Some(Err(backend_err(e))),
            }
        })))
    }

    /// Overwrite directly; sled inserts replace existing values
    fn replace(&mut self, key: &Key, value: &[u8]) -> StoreResult<()> {
        self.db()?.insert(key.encode()?, value).map_err(backend_err)?;
        Ok(())
    }
}
