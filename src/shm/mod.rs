//! Shared-memory object store
//!
//! The backing store service (a standalone process bound to a Unix socket),
//! its wire protocol, and the manager that owns the process from a client.

pub mod process;
pub mod protocol;
pub mod server;
pub mod storage;

pub use process::{StoreProcess, StoreProcessConfig};
pub use protocol::{ObjectEntry, Request, Response};
pub use server::{ShmServer, ShmServerConfig};
pub use storage::{ObjectStore, PutOutcome, StoredObject};
