//! Error type shared by every hook step
//!
//! Errors fall into a handful of classes:
//! - malformed input (missing CPU allocation, bad cpuset, unknown annotation value)
//! - filesystem failures on cgroup/sysfs/procfs files
//! - external commands (`systemctl`, `irqbalance`)
//!
//! "Ineligible container" is not an error: hooks simply return `Ok(())`.

use std::io;
use std::path::{Path, PathBuf};

use crate::cpuset::ParseCpuSetError;

/// Error type for hook operations
#[derive(Debug)]
pub enum HookError {
    /// The container resource spec does not list any CPUs
    MissingCpus { container: String },
    /// A CPU list could not be parsed
    InvalidCpuSet(ParseCpuSetError),
    /// An annotation carries a value the hook does not understand
    InvalidAnnotation { key: String, value: String },
    /// The requested scaling governor is not offered by the CPU
    GovernorUnavailable { governor: String, cpu: usize },
    /// The IRQ affinity mask is malformed or too narrow
    InvalidAffinityMask(String),
    /// The cgroup of the container could not be located
    CgroupLookup(String),
    /// A kernel or state file could not be read or written
    Io { path: PathBuf, source: io::Error },
    /// An external command could not be run or exited unsuccessfully
    Command { program: String, message: String },
    /// The configuration is unusable
    Config(String),
    /// The hook is not valid in the current container lifecycle state
    InvalidTransition {
        from: &'static str,
        hook: &'static str,
    },
    /// A hook step failed; wraps the underlying cause
    Step {
        step: &'static str,
        source: Box<HookError>,
    },
}

impl HookError {
    /// Attach the offending path to an I/O error
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        HookError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap an error with the name of the hook step that produced it
    pub fn step(step: &'static str, source: HookError) -> Self {
        HookError::Step {
            step,
            source: Box::new(source),
        }
    }

    /// True when the root cause is a missing file or directory
    pub fn is_not_found(&self) -> bool {
        match self {
            HookError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            HookError::Step { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

impl std::fmt::Display for HookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookError::MissingCpus { container } => {
                write!(f, "find container {} CPUs", container)
            }
            HookError::InvalidCpuSet(e) => write!(f, "{}", e),
            HookError::InvalidAnnotation { key, value } => {
                write!(f, "invalid annotation value {:?} for {}", value, key)
            }
            HookError::GovernorUnavailable { governor, cpu } => {
                write!(f, "governor {} not available for cpu {}", governor, cpu)
            }
            HookError::InvalidAffinityMask(msg) => write!(f, "invalid IRQ affinity mask: {}", msg),
            HookError::CgroupLookup(msg) => write!(f, "{}", msg),
            HookError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            HookError::Command { program, message } => write!(f, "{}: {}", program, message),
            HookError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            HookError::InvalidTransition { from, hook } => {
                write!(f, "{} hook is not valid for a container in state {}", hook, from)
            }
            HookError::Step { step, source } => write!(f, "{}: {}", step, source),
        }
    }
}

impl std::error::Error for HookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HookError::InvalidCpuSet(e) => Some(e),
            HookError::Io { source, .. } => Some(source),
            HookError::Step { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<ParseCpuSetError> for HookError {
    fn from(e: ParseCpuSetError) -> Self {
        HookError::InvalidCpuSet(e)
    }
}
