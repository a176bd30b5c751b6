//! Key-value stores with pluggable storage backends
//!
//! This crate exposes one key-value interface over interchangeable backends.
//! The main one is a shared-memory object store: an external process holding
//! immutable, content-addressed objects behind a Unix socket, spawned and
//! owned by the client that creates it. An embedded sled-backed store offers
//! the same interface without a separate process.

pub mod codec;
pub mod config;
pub mod key;
pub mod shm;
pub mod store;

pub use codec::{Codec, JsonCodec, TypedStore};
pub use config::Config;
pub use key::{Key, ObjectId};
pub use store::{KvStore, ShmKvStore, ShmStoreConfig, SledKvStore, StoreError, StoreResult};
