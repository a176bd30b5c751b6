//! Backing store process management
//!
//! Owns the store's child process and socket file for their whole lifetime:
//! capacity sizing against available shared memory, spawn with a startup
//! liveness check, and guaranteed teardown on every exit path.

use crate::store::{StoreError, StoreResult};
use std::ffi::CString;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

/// Shared memory mount point queried for sizing
const SHM_MOUNT: &str = "/dev/shm";

/// Default store size as a percentage of available shared memory
const DEFAULT_SHM_PERCENT: u64 = 70;

/// Grace period before polling the child for an immediate exit
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(200);

/// Default backing store binary, resolved via PATH
pub const DEFAULT_STORE_BINARY: &str = "shm-store";

/// Backing store process configuration
#[derive(Debug, Clone)]
pub struct StoreProcessConfig {
    /// Directory holding the socket file, created if missing
    pub dir: PathBuf,
    /// Socket file name
    pub name: String,
    /// Capacity in bytes. Defaults to 70% of available shared memory.
    pub size: Option<u64>,
    /// Store binary to launch
    pub binary: PathBuf,
    /// Startup grace period before the liveness poll
    pub startup_grace: Duration,
}

impl Default for StoreProcessConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("kvstores"),
            name: "kvstores_store_socket".to_string(),
            size: None,
            binary: PathBuf::from(DEFAULT_STORE_BINARY),
            startup_grace: DEFAULT_STARTUP_GRACE,
        }
    }
}

/// Owner of the backing store process and its socket file
pub struct StoreProcess {
    socket_path: PathBuf,
    size: u64,
    binary: PathBuf,
    startup_grace: Duration,
    child: Option<Child>,
    created: bool,
}

impl StoreProcess {
    /// Validate the capacity request and prepare the socket directory.
    /// Fails if an explicit size exceeds the available shared memory;
    /// nothing is spawned here.
    pub fn prepare(config: StoreProcessConfig) -> StoreResult<Self> {
        if !config.dir.exists() {
            fs::create_dir_all(&config.dir)?;
        }
        let size = effective_size(config.size)?;
        Ok(Self {
            socket_path: config.dir.join(&config.name),
            size,
            binary: config.binary,
            startup_grace: config.startup_grace,
            child: None,
            created: false,
        })
    }

    /// Spawn the backing store process bound to the socket. A stale socket
    /// file at the path is removed first. After a short grace period the
    /// child is polled once; an already-exited child is a startup failure
    /// and nothing is retried.
    pub fn create(&mut self) -> StoreResult<()> {
        if self.created {
            return Err(StoreError::Config(
                "backing store already created; use connect() instead".to_string(),
            ));
        }

        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)?;
        }

        log::debug!(
            "launching {} -s {} -m {}",
            self.binary.display(),
            self.socket_path.display(),
            self.size
        );
        let mut child = Command::new(&self.binary)
            .arg("-s")
            .arg(&self.socket_path)
            .arg("-m")
            .arg(self.size.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // The pipes must be drained continuously; a chatty child would
        // otherwise block on a full pipe buffer and stop serving.
        if let Some(stdout) = child.stdout.take() {
            drain_child_output("stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            drain_child_output("stderr", stderr);
        }

        thread::sleep(self.startup_grace);

        if let Some(status) = child.try_wait()? {
            let _ = fs::remove_file(&self.socket_path);
            return Err(StoreError::Startup(status));
        }

        self.child = Some(child);
        self.created = true;
        log::info!("backing store running on {}", self.socket_path.display());
        Ok(())
    }

    /// Request graceful termination, reap the child, and remove the socket
    /// file. Must be invoked on every exit path that created a process.
    pub fn terminate(&mut self) -> StoreResult<()> {
        if !self.created {
            return Err(StoreError::State(
                "backing store has not been created; call create() first".to_string(),
            ));
        }

        if let Some(mut child) = self.child.take() {
            let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                // SIGTERM could not be delivered (child likely already gone)
                let _ = child.kill();
            }
            child.wait()?;
        }
        self.created = false;

        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)?;
        }
        log::info!("backing store on {} terminated", self.socket_path.display());
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Effective capacity in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl Drop for StoreProcess {
    fn drop(&mut self) {
        if self.created {
            log::warn!(
                "backing store on {} dropped without cleanup(), terminating",
                self.socket_path.display()
            );
            if let Err(e) = self.terminate() {
                log::warn!("failed to terminate backing store: {}", e);
            }
        }
    }
}

/// Forward one captured child stream through the log until EOF. The reader
/// thread outlives `StoreProcess` if the child does; it exits when the
/// stream closes.
fn drain_child_output<R: Read + Send + 'static>(name: &'static str, stream: R) {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(line) => log::debug!("store {}: {}", name, line),
                Err(_) => break,
            }
        }
    });
}

/// Resolve the effective store size against available shared memory
fn effective_size(requested: Option<u64>) -> StoreResult<u64> {
    let available = available_shm_memory()?;
    match requested {
        Some(size) if size <= available => Ok(size),
        Some(size) => Err(StoreError::Config(format!(
            "requested store size {} exceeds available shared memory {}",
            size, available
        ))),
        None => default_store_size(),
    }
}

/// Default store size: a fixed fraction of the available shared memory
pub fn default_store_size() -> StoreResult<u64> {
    Ok(available_shm_memory()? / 100 * DEFAULT_SHM_PERCENT)
}

/// Available shared memory in bytes: filesystem block size times free blocks
/// on the shared-memory mount.
pub fn available_shm_memory() -> StoreResult<u64> {
    let path = CString::new(SHM_MOUNT)
        .map_err(|e| StoreError::Config(format!("bad shm mount path: {}", e)))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(StoreError::Io(std::io::Error::last_os_error()));
    }
    Ok(stat.f_bsize as u64 * stat.f_bavail as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> StoreProcessConfig {
        StoreProcessConfig {
            dir: dir.path().to_path_buf(),
            name: "test_socket".to_string(),
            size: Some(1024 * 1024),
            ..StoreProcessConfig::default()
        }
    }

    #[test]
    fn test_oversized_capacity_rejected() {
        let dir = TempDir::new().unwrap();
        let result = StoreProcess::prepare(StoreProcessConfig {
            size: Some(u64::MAX),
            ..config(&dir)
        });
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_default_size_is_fraction_of_available() {
        let dir = TempDir::new().unwrap();
        let process = StoreProcess::prepare(StoreProcessConfig {
            size: None,
            ..config(&dir)
        })
        .unwrap();
        let available = available_shm_memory().unwrap();
        assert!(process.size() > 0);
        assert!(process.size() <= available);
    }

    #[test]
    fn test_default_store_size_within_available() {
        let size = default_store_size().unwrap();
        assert!(size > 0);
        assert!(size <= available_shm_memory().unwrap());
    }

    #[test]
    fn test_socket_dir_created() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b");
        let process = StoreProcess::prepare(StoreProcessConfig {
            dir: nested.clone(),
            ..config(&dir)
        })
        .unwrap();
        assert!(nested.exists());
        assert_eq!(process.socket_path(), nested.join("test_socket"));
    }

    #[test]
    fn test_terminate_before_create() {
        let dir = TempDir::new().unwrap();
        let mut process = StoreProcess::prepare(config(&dir)).unwrap();
        assert!(matches!(process.terminate(), Err(StoreError::State(_))));
    }

    #[test]
    fn test_startup_failure_reports_exit_status() {
        let dir = TempDir::new().unwrap();
        let mut process = StoreProcess::prepare(StoreProcessConfig {
            binary: PathBuf::from("false"),
            ..config(&dir)
        })
        .unwrap();

        match process.create() {
            Err(StoreError::Startup(status)) => assert!(!status.success()),
            other => panic!("expected startup error, got {:?}", other.err()),
        }
        // Startup failure leaves the instance un-created
        assert!(!process.is_created());
        assert!(matches!(process.terminate(), Err(StoreError::State(_))));
    }

    #[test]
    fn test_double_create_guard() {
        let dir = TempDir::new().unwrap();
        let mut process = StoreProcess::prepare(config(&dir)).unwrap();
        process.created = true;
        assert!(matches!(process.create(), Err(StoreError::Config(_))));
        process.created = false;
    }
}
