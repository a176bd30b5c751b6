//! Keys and content addressing
//!
//! Keys (text, raw bytes, or integers) are canonicalized to bytes and hashed
//! with BLAKE2b into fixed-width object ids. The same key always yields the
//! same id, in any process, at any time; independent clients addressing the
//! same key cooperate without a shared index.

use crate::store::{StoreError, StoreResult};
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Length of an object id in bytes
pub const OBJECT_ID_LEN: usize = 20;

/// A store key: text, raw bytes, or an integer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Text(String),
    Bytes(Vec<u8>),
    Int(i64),
}

impl Key {
    /// Canonical byte form used for hashing.
    /// Text hashes as its UTF-8 bytes, integers as their decimal text.
    pub fn canonical_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Key::Text(s) => Cow::Borrowed(s.as_bytes()),
            Key::Bytes(b) => Cow::Borrowed(b),
            Key::Int(i) => Cow::Owned(i.to_string().into_bytes()),
        }
    }

    /// Self-describing encoding, stored alongside object data so that
    /// iteration can recover the original key.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| StoreError::KeyType(format!("failed to encode key: {}", e)))
    }

    /// Decode a key previously produced by [`Key::encode`]
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| StoreError::KeyType(format!("failed to decode stored key: {}", e)))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key::Bytes(b)
    }
}

impl From<&[u8]> for Key {
    fn from(b: &[u8]) -> Self {
        Key::Bytes(b.to_vec())
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

/// Hash a key to `digest_size` bytes using BLAKE2b.
/// Valid digest sizes are 1 through 64.
pub fn hash_key(key: &Key, digest_size: usize) -> StoreResult<Vec<u8>> {
    let mut hasher = Blake2bVar::new(digest_size)
        .map_err(|_| StoreError::Config(format!("invalid digest size: {}", digest_size)))?;
    hasher.update(&key.canonical_bytes());
    let mut digest = vec![0u8; digest_size];
    hasher
        .finalize_variable(&mut digest)
        .map_err(|_| StoreError::Config(format!("invalid digest size: {}", digest_size)))?;
    Ok(digest)
}

/// Fixed-width content address derived from a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// Derive the object id for a key
    pub fn for_key(key: &Key) -> Self {
        // OBJECT_ID_LEN is always within BLAKE2b's output range
        let mut hasher = Blake2bVar::new(OBJECT_ID_LEN).expect("valid digest size");
        hasher.update(&key.canonical_bytes());
        let mut digest = [0u8; OBJECT_ID_LEN];
        hasher
            .finalize_variable(&mut digest)
            .expect("digest buffer matches output size");
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    /// Parse an id from a wire payload; fails if the length is wrong
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        let arr: [u8; OBJECT_ID_LEN] = bytes
            .try_into()
            .map_err(|_| StoreError::Protocol(format!("invalid object id length: {}", bytes.len())))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let key = Key::from("some key");
        let a = hash_key(&key, 20).unwrap();
        let b = hash_key(&key, 20).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn test_hash_distinct_keys() {
        let a = hash_key(&Key::from("a"), 20).unwrap();
        let b = hash_key(&Key::from("b"), 20).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_digest_sizes() {
        let key = Key::from("sized");
        assert_eq!(hash_key(&key, 16).unwrap().len(), 16);
        assert_eq!(hash_key(&key, 64).unwrap().len(), 64);
        assert!(matches!(hash_key(&key, 0), Err(StoreError::Config(_))));
        assert!(matches!(hash_key(&key, 65), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_object_id_matches_hash() {
        let key = Key::from(42i64);
        let id = ObjectId::for_key(&key);
        let digest = hash_key(&key, OBJECT_ID_LEN).unwrap();
        assert_eq!(id.as_bytes().as_slice(), digest.as_slice());
    }

    #[test]
    fn test_int_canonical_form_is_decimal_text() {
        assert_eq!(&*Key::Int(1234).canonical_bytes(), b"1234");
        assert_eq!(&*Key::Int(-7).canonical_bytes(), b"-7");
    }

    #[test]
    fn test_key_encode_roundtrip() {
        for key in [
            Key::from("text"),
            Key::from(vec![0u8, 255, 3]),
            Key::from(-99i64),
        ] {
            let encoded = key.encode().unwrap();
            assert_eq!(Key::decode(&encoded).unwrap(), key);
        }
    }

    #[test]
    fn test_key_decode_garbage() {
        assert!(matches!(
            Key::decode(b"not a key"),
            Err(StoreError::KeyType(_))
        ));
    }

    #[test]
    fn test_object_id_from_bytes() {
        let id = ObjectId::for_key(&Key::from("x"));
        let parsed = ObjectId::from_bytes(id.as_bytes()).unwrap();
        assert_eq!(parsed, id);
        assert!(ObjectId::from_bytes(&[0u8; 19]).is_err());
    }
}
