//! Single instance lock using a Unix socket.
//!
//! The telemetry loop is not reentrant: two agents sharing the same one-wire
//! bus and shadow session would interleave conversions and fight over the
//! indicator. Binding a Unix socket guarantees only one agent per device, and
//! the OS releases the socket when the process dies.

use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error types for instance lock operations.
#[derive(Debug, Error)]
pub enum InstanceLockError {
    /// Another agent already holds the lock.
    #[error("another telemetry agent is already running ({0})")]
    AlreadyRunning(PathBuf),

    /// I/O error during lock acquisition.
    #[error("failed to acquire instance lock: {0}")]
    Io(#[from] io::Error),
}

/// Held for the lifetime of the agent; dropping it removes the socket file.
pub struct InstanceLock {
    _listener: UnixListener,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock named `name` inside the runtime directory.
    pub fn acquire(name: &str) -> Result<Self, InstanceLockError> {
        Self::acquire_at(Self::socket_path(name))
    }

    /// Acquire the lock at an explicit socket path.
    pub fn acquire_at(path: PathBuf) -> Result<Self, InstanceLockError> {
        // A socket file nobody answers on was left behind by a killed agent.
        if path.exists() {
            if UnixStream::connect(&path).is_ok() {
                return Err(InstanceLockError::AlreadyRunning(path));
            }
            let _ = std::fs::remove_file(&path);
        }

        match UnixListener::bind(&path) {
            Ok(listener) => {
                log::debug!("[Agent] Instance lock held at {}", path.display());
                Ok(Self {
                    _listener: listener,
                    path,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                Err(InstanceLockError::AlreadyRunning(path))
            }
            Err(e) => Err(InstanceLockError::Io(e)),
        }
    }

    /// Socket path for `name`, under `XDG_RUNTIME_DIR` or `/tmp`.
    pub fn socket_path(name: &str) -> PathBuf {
        std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join(format!("{name}.sock"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_socket(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "water-telemetry-lock-{}-{}.sock",
            tag,
            std::process::id()
        ))
    }

    #[test]
    fn test_second_acquire_is_rejected() {
        let path = scratch_socket("second");
        let first = InstanceLock::acquire_at(path.clone()).expect("first lock");

        match InstanceLock::acquire_at(path.clone()) {
            Err(InstanceLockError::AlreadyRunning(p)) => assert_eq!(p, path),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("second lock must not succeed"),
        }

        drop(first);
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_socket_is_reclaimed() {
        let path = scratch_socket("stale");
        {
            // Bind and leak the file without a listener behind it.
            let listener = UnixListener::bind(&path).expect("bind");
            drop(listener);
        }
        assert!(path.exists());

        let lock = InstanceLock::acquire_at(path.clone()).expect("reclaim stale socket");
        assert_eq!(lock.path(), path.as_path());
    }

    #[test]
    fn test_socket_path_uses_name() {
        let path = InstanceLock::socket_path("water-telemetry-agent");
        assert_eq!(
            path.file_name().and_then(|f| f.to_str()),
            Some("water-telemetry-agent.sock")
        );
    }
}
