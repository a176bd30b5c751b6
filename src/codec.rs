//! Value serialization at the store boundary
//!
//! Backends move raw bytes; what those bytes mean is an injected capability.
//! A [`Codec`] supplies the encode/decode pair and [`TypedStore`] applies it
//! on top of any backend.

use crate::key::Key;
use crate::store::{KvStore, StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<CodecError> for StoreError {
    fn from(e: CodecError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// An encode/decode pair for arbitrary serializable values
pub trait Codec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec, the default
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Typed view over a byte-oriented store
pub struct TypedStore<S, C> {
    store: S,
    codec: C,
}

impl<S: KvStore, C: Codec> TypedStore<S, C> {
    pub fn new(store: S, codec: C) -> Self {
        Self { store, codec }
    }

    /// The underlying byte-oriented store
    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    pub fn put<T: Serialize>(&mut self, key: &Key, value: &T) -> StoreResult<()> {
        let bytes = self.codec.encode(value)?;
        self.store.put(key, &bytes)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &Key) -> StoreResult<Option<T>> {
        match self.store.get(key)? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn replace<T: Serialize>(&mut self, key: &Key, value: &T) -> StoreResult<()> {
        let bytes = self.codec.encode(value)?;
        self.store.replace(key, &bytes)
    }

    pub fn get_multi<T: DeserializeOwned>(&self, keys: &[Key]) -> StoreResult<HashMap<Key, T>> {
        let mut found = HashMap::new();
        for (key, bytes) in self.store.get_multi(keys)? {
            found.insert(key, self.codec.decode(&bytes)?);
        }
        Ok(found)
    }

    pub fn set_multi<T: Serialize>(&mut self, keys: &[Key], values: &[T]) -> StoreResult<()> {
        if keys.len() != values.len() {
            return Err(StoreError::LengthMismatch {
                keys: keys.len(),
                values: values.len(),
            });
        }
        let encoded = values
            .iter()
            .map(|value| self.codec.encode(value))
            .collect::<Result<Vec<_>, _>>()?;
        self.store.set_multi(keys, &encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SledKvStore;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_json_roundtrip() {
        let codec = JsonCodec;
        let sample = Sample {
            name: "x".to_string(),
            count: 3,
        };
        let bytes = codec.encode(&sample).unwrap();
        let decoded: Sample = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn test_decode_garbage() {
        let codec = JsonCodec;
        let result: Result<Sample, _> = codec.decode(b"{nope");
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_typed_store_over_backend() {
        let dir = TempDir::new().unwrap();
        let backend = SledKvStore::open(dir.path().join("db")).unwrap();
        let mut store = TypedStore::new(backend, JsonCodec);

        let key = Key::from("a");
        store.put(&key, &1u64).unwrap();
        assert_eq!(store.get::<u64>(&key).unwrap(), Some(1));

        // put keeps the first value, replace overwrites
        store.put(&key, &2u64).unwrap();
        assert_eq!(store.get::<u64>(&key).unwrap(), Some(1));
        store.replace(&key, &2u64).unwrap();
        assert_eq!(store.get::<u64>(&key).unwrap(), Some(2));

        let keys = [Key::from("s1"), Key::from("s2")];
        store
            .set_multi(
                &keys,
                &[
                    Sample {
                        name: "one".to_string(),
                        count: 1,
                    },
                    Sample {
                        name: "two".to_string(),
                        count: 2,
                    },
                ],
            )
            .unwrap();
        let found: HashMap<Key, Sample> = store.get_multi(&keys).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&keys[0]].count, 1);
    }

    #[test]
    fn test_typed_set_multi_mismatch() {
        let dir = TempDir::new().unwrap();
        let backend = SledKvStore::open(dir.path().join("db")).unwrap();
        let mut store = TypedStore::new(backend, JsonCodec);

        let result = store.set_multi(&[Key::from("a")], &[] as &[u64]);
        assert!(matches!(result, Err(StoreError::LengthMismatch { .. })));
        assert_eq!(store.inner().len().unwrap(), 0);
    }
}
