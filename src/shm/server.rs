//! Backing store service
//!
//! Listens on a Unix domain socket and serves object store requests from any
//! number of concurrently connected clients. All coherency between clients is
//! provided here, behind a single lock around the object store.

use super::protocol::{read_request, write_response, Request, Response};
use super::storage::{ObjectStore, PutOutcome};
use crate::store::{StoreError, StoreResult};
use std::io::ErrorKind;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

/// Backing store server configuration
#[derive(Debug, Clone)]
pub struct ShmServerConfig {
    /// Unix socket path to bind
    pub socket_path: PathBuf,
    /// Capacity budget in bytes
    pub capacity: u64,
}

/// Backing store server
pub struct ShmServer {
    listener: UnixListener,
    store: Arc<Mutex<ObjectStore>>,
}

impl ShmServer {
    /// Bind the socket and prepare the store. Any stale socket file at the
    /// path is removed first.
    pub fn bind(config: ShmServerConfig) -> StoreResult<Self> {
        if config.socket_path.exists() {
            std::fs::remove_file(&config.socket_path)?;
        }
        let listener = UnixListener::bind(&config.socket_path)?;
        log::info!(
            "object store listening on {} (capacity {} bytes)",
            config.socket_path.display(),
            config.capacity
        );
        Ok(Self {
            listener,
            store: Arc::new(Mutex::new(ObjectStore::new(config.capacity))),
        })
    }

    /// Accept and serve clients until the process is terminated
    pub fn run(&self) -> StoreResult<()> {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let store = Arc::clone(&self.store);
                    thread::spawn(move || {
                        if let Err(e) = handle_client(stream, store) {
                            log::warn!("client handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    log::error!("accept error: {}", e);
                }
            }
        }
        Ok(())
    }
}

/// Handle a client connection
fn handle_client(mut stream: UnixStream, store: Arc<Mutex<ObjectStore>>) -> StoreResult<()> {
    log::info!("client connected");

    loop {
        let request = match read_request(&mut stream) {
            Ok(request) => request,
            Err(StoreError::Io(ref e)) if e.kind() == ErrorKind::UnexpectedEof => {
                log::info!("client disconnected");
                return Ok(());
            }
            Err(StoreError::Io(e)) => {
                log::warn!("error reading request: {}", e);
                return Err(StoreError::Io(e));
            }
            Err(e) => {
                // Malformed frame on an intact stream; tell the client what
                // was wrong before giving up on the connection.
                log::warn!("error reading request: {}", e);
                let _ = write_response(&mut stream, &Response::Error(e.to_string()));
                return Err(e);
            }
        };

        let response = match request {
            Request::Put { id, meta, data } => {
                let mut store = store.lock().unwrap();
                match store.put(id, meta, data) {
                    PutOutcome::Stored => Response::Ok,
                    PutOutcome::AlreadyStored => Response::AlreadyStored,
                    PutOutcome::Full => Response::Full,
                }
            }
            Request::Get(id) => {
                let store = store.lock().unwrap();
                match store.get(&id) {
                    Some(object) => Response::Value {
                        meta: object.meta.clone(),
                        data: object.data.clone(),
                    },
                    None => Response::NotFound,
                }
            }
            Request::Delete(ids) => {
                let mut store = store.lock().unwrap();
                store.remove(&ids);
                Response::Ok
            }
            Request::Contains(id) => {
                let store = store.lock().unwrap();
                Response::Bool(store.contains(&id))
            }
            Request::List => {
                let store = store.lock().unwrap();
                Response::Listing(store.entries())
            }
            Request::Capacity => {
                let store = store.lock().unwrap();
                Response::Capacity(store.capacity())
            }
            Request::Ping => Response::Pong,
        };

        if let Err(e) = write_response(&mut stream, &response) {
            log::warn!("error writing response: {}", e);
            return Err(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::protocol::{read_response, RequestOp};
    use std::io::Write;
    use tempfile::TempDir;

    fn start_server(dir: &TempDir) -> PathBuf {
        let socket = dir.path().join("server.sock");
        let server = ShmServer::bind(ShmServerConfig {
            socket_path: socket.clone(),
            capacity: 1024,
        })
        .unwrap();
        thread::spawn(move || {
            let _ = server.run();
        });
        socket
    }

    #[test]
    fn test_malformed_frame_gets_error_reply() {
        let dir = TempDir::new().unwrap();
        let socket = start_server(&dir);

        let mut stream = UnixStream::connect(&socket).unwrap();
        // unknown opcode with an empty payload
        stream.write_all(&[0x42]).unwrap();
        stream.write_all(&0u32.to_le_bytes()).unwrap();
        stream.flush().unwrap();

        match read_response(&mut stream).unwrap() {
            Response::Error(msg) => assert!(msg.contains("opcode")),
            other => panic!("expected error reply, got {:?}", other),
        }
    }

    #[test]
    fn test_short_payload_gets_error_reply() {
        let dir = TempDir::new().unwrap();
        let socket = start_server(&dir);

        let mut stream = UnixStream::connect(&socket).unwrap();
        // a get whose payload is too short to hold an object id
        stream.write_all(&[RequestOp::Get as u8]).unwrap();
        stream.write_all(&3u32.to_le_bytes()).unwrap();
        stream.write_all(&[1, 2, 3]).unwrap();
        stream.flush().unwrap();

        match read_response(&mut stream).unwrap() {
            Response::Error(_) => {}
            other => panic!("expected error reply, got {:?}", other),
        }
    }
}
