//! Per-node serialization of hook invocations
//!
//! Ancestor cgroups (`cpuset.cpus.exclusive` of a pod or QoS slice) and the
//! irqbalance configuration are updated read-modify-write. Two hooks touching
//! the same ancestors must not interleave, so the orchestrator holds an
//! exclusive `flock` on a node-wide lock file around each hook.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};
use tracing::debug;

use crate::error::HookError;

/// Held exclusive lock; released when dropped
#[derive(Debug)]
pub struct NodeLock {
    path: PathBuf,
    // keeps the descriptor (and so the flock) alive
    _file: File,
}

impl NodeLock {
    /// Block until the exclusive lock on `path` is acquired
    pub fn acquire(path: &Path) -> Result<Self, HookError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HookError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| HookError::io(path, e))?;

        flock(file.as_raw_fd(), FlockArg::LockExclusive)
            .map_err(|e| HookError::io(path, std::io::Error::from(e)))?;
        debug!(path = %path.display(), "node lock acquired");

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    /// Block on the lock at `path` when one is configured
    pub fn acquire_optional(path: Option<&Path>) -> Result<Option<Self>, HookError> {
        path.map(Self::acquire).transpose()
    }

    /// Try to take the lock without blocking; `None` when another holder has it
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, HookError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| HookError::io(path, e))?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(Some(Self {
                path: path.to_path_buf(),
                _file: file,
            })),
            Err(nix::errno::Errno::EWOULDBLOCK) => Ok(None),
            Err(e) => Err(HookError::io(path, std::io::Error::from(e))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NodeLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "node lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/hooks.lock");

        let held = NodeLock::acquire(&path).unwrap();
        assert_eq!(held.path(), path.as_path());
        // flock locks belong to the open file description, so a second open conflicts
        assert!(NodeLock::try_acquire(&path).unwrap().is_none());

        drop(held);
        assert!(NodeLock::try_acquire(&path).unwrap().is_some());
    }
}
