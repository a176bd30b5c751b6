//! Shared-memory object store backend
//!
//! Client for the backing store process. Owns the process through
//! [`StoreProcess`], gates every operation on an established connection, and
//! addresses values by hashing keys into fixed-width object ids. Multiple
//! independent OS processes may each hold their own connection to the same
//! backing process; coherency between them is the backing process's job.

use crate::key::{Key, ObjectId};
use crate::shm::process::{
    StoreProcess, StoreProcessConfig, DEFAULT_STARTUP_GRACE, DEFAULT_STORE_BINARY,
};
use crate::shm::protocol::{read_response, write_request, ObjectEntry, Request, Response};
use crate::store::{KvStore, StoreError, StoreResult};
use std::io::{BufReader, BufWriter};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Shared-memory store configuration
#[derive(Debug, Clone)]
pub struct ShmStoreConfig {
    /// Directory holding the socket file, created if missing
    pub dir: PathBuf,
    /// Socket file name
    pub name: String,
    /// Capacity in bytes. Defaults to 70% of available shared memory.
    pub size: Option<u64>,
    /// Spawn the backing process at construction. With `false`, an explicit
    /// [`ShmKvStore::create`] call is required before connecting.
    pub create: bool,
    /// Backing store binary to launch
    pub binary: PathBuf,
    /// Startup grace period before the liveness poll
    pub startup_grace: Duration,
}

impl Default for ShmStoreConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("kvstores"),
            name: "kvstores_store_socket".to_string(),
            size: None,
            create: true,
            binary: PathBuf::from(DEFAULT_STORE_BINARY),
            startup_grace: DEFAULT_STARTUP_GRACE,
        }
    }
}

/// Connection lifecycle. An instance is not reusable once disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Created,
    Connected,
    Disconnected,
}

/// A live session with the backing store
struct Session {
    reader: BufReader<UnixStream>,
    writer: BufWriter<UnixStream>,
}

impl Session {
    /// Connect to the store socket and verify liveness with a ping
    fn open(path: &Path) -> StoreResult<Self> {
        let stream = UnixStream::connect(path).map_err(|e| {
            StoreError::Connection(format!("failed to connect to {}: {}", path.display(), e))
        })?;
        let reader = BufReader::new(stream.try_clone().map_err(|e| {
            StoreError::Connection(format!("failed to clone store stream: {}", e))
        })?);
        let writer = BufWriter::new(stream);

        let mut session = Self { reader, writer };
        match session.call(&Request::Ping)? {
            Response::Pong => Ok(session),
            other => Err(unexpected_response("ping", other)),
        }
    }

    /// Send a request and read its response. Server-reported errors surface
    /// as backend errors.
    fn call(&mut self, request: &Request) -> StoreResult<Response> {
        write_request(&mut self.writer, request)?;
        match read_response(&mut self.reader)? {
            Response::Error(msg) => Err(StoreError::Backend(msg)),
            response => Ok(response),
        }
    }
}

fn unexpected_response(op: &str, response: Response) -> StoreError {
    StoreError::Protocol(format!("unexpected response to {}: {:?}", op, response))
}

/// Key-value store backed by the shared-memory object store process.
///
/// Keys are hashed with BLAKE2b into 20-byte object ids; the encoded key is
/// stored alongside the value so iteration can recover it. `put` is
/// first-writer-wins; `replace` overwrites.
pub struct ShmKvStore {
    process: StoreProcess,
    session: Mutex<Option<Session>>,
    state: ConnState,
}

impl ShmKvStore {
    /// Build the backend. Sizing is validated here; with `config.create` the
    /// backing process is spawned as well. Connect separately with
    /// [`KvStore::connect`].
    pub fn new(config: ShmStoreConfig) -> StoreResult<Self> {
        let mut process = StoreProcess::prepare(StoreProcessConfig {
            dir: config.dir,
            name: config.name,
            size: config.size,
            binary: config.binary,
            startup_grace: config.startup_grace,
        })?;
        if config.create {
            process.create()?;
        }
        Ok(Self {
            process,
            session: Mutex::new(None),
            state: ConnState::Created,
        })
    }

    /// Spawn the backing process if construction was done with
    /// `create: false`. Fails on a second call.
    pub fn create(&mut self) -> StoreResult<()> {
        self.process.create()
    }

    pub fn socket_path(&self) -> &Path {
        self.process.socket_path()
    }

    /// Fail fast unless a connection is established. Invoked first in every
    /// data and capacity operation; never mutates the store.
    fn require_connected(&self) -> StoreResult<()> {
        if self.state == ConnState::Connected {
            Ok(())
        } else {
            Err(StoreError::Connection(
                "object store is not connected; use connect() to connect to it first".to_string(),
            ))
        }
    }

    fn call(&self, request: &Request) -> StoreResult<Response> {
        self.require_connected()?;
        let mut guard = self.session.lock().unwrap();
        let session = guard
            .as_mut()
            .ok_or_else(|| StoreError::Connection("no live session".to_string()))?;
        session.call(request)
    }

    /// Resolve an object id to its (key, value) pair, if still present
    fn fetch(&self, id: &ObjectId) -> StoreResult<Option<(Key, Vec<u8>)>> {
        match self.call(&Request::Get(*id))? {
            Response::Value { meta, data } => Ok(Some((Key::decode(&meta)?, data))),
            Response::NotFound => Ok(None),
            other => Err(unexpected_response("get", other)),
        }
    }

    fn listing(&self) -> StoreResult<Vec<ObjectEntry>> {
        match self.call(&Request::List)? {
            Response::Listing(entries) => Ok(entries),
            other => Err(unexpected_response("list", other)),
        }
    }

    /// Capacity configured at creation, as reported by the backing store
    pub fn store_capacity(&self) -> StoreResult<u64> {
        self.require_connected()?;
        match self.call(&Request::Capacity)? {
            Response::Capacity(bytes) => Ok(bytes),
            other => Err(unexpected_response("capacity", other)),
        }
    }

    /// Sum of data and metadata sizes across all currently stored objects
    pub fn used_memory(&self) -> StoreResult<u64> {
        self.require_connected()?;
        Ok(self
            .listing()?
            .iter()
            .map(|entry| entry.data_size + entry.meta_size)
            .sum())
    }

    /// Free capacity remaining in the backing store
    pub fn available_memory(&self) -> StoreResult<u64> {
        Ok(self.store_capacity()?.saturating_sub(self.used_memory()?))
    }
}

impl KvStore for ShmKvStore {
    /// Attach to the backing process's socket. Valid only before the first
    /// connect, and only once the process was created. A failed connect
    /// terminates the just-created process before the error surfaces - an
    /// orphaned backing process is never left behind.
    fn connect(&mut self) -> StoreResult<()> {
        match self.state {
            ConnState::Connected => {
                return Err(StoreError::Connection("already connected".to_string()))
            }
            ConnState::Disconnected => {
                return Err(StoreError::Connection(
                    "this instance was disconnected; build a fresh instance to reconnect"
                        .to_string(),
                ))
            }
            ConnState::Created => {}
        }
        if !self.process.is_created() {
            return Err(StoreError::Connection(
                "backing store has not been created; call create() first".to_string(),
            ));
        }

        match Session::open(self.process.socket_path()) {
            Ok(session) => {
                *self.session.lock().unwrap() = Some(session);
                self.state = ConnState::Connected;
                Ok(())
            }
            Err(e) => {
                if let Err(term_err) = self.process.terminate() {
                    log::warn!(
                        "failed to terminate backing store after failed connect: {}",
                        term_err
                    );
                }
                Err(StoreError::Connection(format!(
                    "failed to connect to the object store: {}",
                    e
                )))
            }
        }
    }

    fn disconnect(&mut self) -> StoreResult<()> {
        self.require_connected()?;
        *self.session.lock().unwrap() = None;
        self.state = ConnState::Disconnected;
        Ok(())
    }

    /// Terminate the backing process and remove its socket file
    fn cleanup(&mut self) -> StoreResult<()> {
        *self.session.lock().unwrap() = None;
        if self.state == ConnState::Connected {
            self.state = ConnState::Disconnected;
        }
        self.process.terminate()
    }

    fn put(&mut self, key: &Key, value: &[u8]) -> StoreResult<()> {
        self.require_connected()?;
        let id = ObjectId::for_key(key);
        let meta = key.encode()?;
        match self.call(&Request::Put {
            id,
            meta,
            data: value.to_vec(),
        })? {
            Response::Ok => Ok(()),
            Response::AlreadyStored => {
                log::debug!("put: object {} already stored, ignoring", id);
                Ok(())
            }
            Response::Full => Err(StoreError::StoreFull),
            other => Err(unexpected_response("put", other)),
        }
    }

    fn get(&self, key: &Key) -> StoreResult<Option<Vec<u8>>> {
        self.require_connected()?;
        Ok(self.fetch(&ObjectId::for_key(key))?.map(|(_, value)| value))
    }

    fn delete(&mut self, keys: &[Key]) -> StoreResult<()> {
        self.require_connected()?;
        let ids = keys.iter().map(ObjectId::for_key).collect();
        match self.call(&Request::Delete(ids))? {
            Response::Ok => Ok(()),
            other => Err(unexpected_response("delete", other)),
        }
    }

    fn contains(&self, key: &Key) -> StoreResult<bool> {
        self.require_connected()?;
        match self.call(&Request::Contains(ObjectId::for_key(key)))? {
            Response::Bool(present) => Ok(present),
            other => Err(unexpected_response("contains", other)),
        }
    }

    fn len(&self) -> StoreResult<usize> {
        self.require_connected()?;
        Ok(self.listing()?.len())
    }

    /// Snapshot the current set of object ids, then resolve each lazily.
    /// Objects deleted after the snapshot are skipped; later writes are not
    /// observed.
    fn iter(&self) -> StoreResult<Box<dyn Iterator<Item = StoreResult<(Key, Vec<u8>)>> + '_>> {
        self.require_connected()?;
        let ids: Vec<ObjectId> = self.listing()?.into_iter().map(|entry| entry.id).collect();
        Ok(Box::new(
            ids.into_iter()
                .filter_map(move |id| self.fetch(&id).transpose()),
        ))
    }
}
