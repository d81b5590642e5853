//! Access to kernel-exposed files (cgroupfs, sysfs, procfs)
//!
//! Every hook reads and writes node state through [`KernelFs`] so tests can
//! point the hooks at a temporary tree or inject failures.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::HookError;

/// Read/write capability over kernel files
pub trait KernelFs: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<String>;
    /// Replace the whole content of `path`
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn create_dir(&self, path: &Path) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem of the node
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFs;

impl KernelFs for HostFs {
    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        fs::write(path, contents)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// Read `dir/file`, keeping the path in the error
pub fn read_cgroup_file(fs: &dyn KernelFs, dir: &Path, file: &str) -> Result<String, HookError> {
    let path = dir.join(file);
    fs.read(&path).map_err(|e| HookError::io(&path, e))
}

/// Write `value` to `dir/file`, keeping the path in the error
pub fn write_cgroup_file(
    fs: &dyn KernelFs,
    dir: &Path,
    file: &str,
    value: &str,
) -> Result<(), HookError> {
    let path = dir.join(file);
    fs.write(&path, value).map_err(|e| HookError::io(&path, e))
}
