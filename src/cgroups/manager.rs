//! Cgroup drivers and resource updates
//!
//! Container cgroups are laid out by one of two drivers, picked from the
//! naming convention of the pod cgroup parent:
//!
//! ```text
//! systemd   parent "kubepods-burstable-pod1.slice"
//!           → /kubepods.slice/kubepods-burstable.slice/kubepods-burstable-pod1.slice/crio-<id>.scope
//!
//! cgroupfs  parent "/kubepods/pod1"
//!           → /kubepods/pod1/crio-<id>
//! ```
//!
//! [`CgroupManager`] writes resource limits into a cgroup named the way the
//! driver names it. Only CPU bandwidth is handled; device rules are never
//! touched.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{join_cgroup, CgroupVersion, CPU_CFS_QUOTA_US, CPU_MAX, V1_CPU_MOUNT};
use crate::error::HookError;
use crate::node::{write_cgroup_file, NodeEnv};

/// Prefix of container scopes and directories
pub const CRIO_PREFIX: &str = "crio";

const SLICE_SUFFIX: &str = ".slice";
const DEFAULT_SYSTEMD_PARENT: &str = "system.slice";

/// How container cgroups are named on this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupDriver {
    Systemd,
    Cgroupfs,
}

impl CgroupDriver {
    /// systemd when the parent is a slice unit, cgroupfs otherwise
    pub fn for_parent(parent: &str) -> Self {
        if parent.ends_with(SLICE_SUFFIX) {
            CgroupDriver::Systemd
        } else {
            CgroupDriver::Cgroupfs
        }
    }

    pub fn is_systemd(self) -> bool {
        self == CgroupDriver::Systemd
    }

    /// Cgroup path of container `container_id` under the sandbox parent,
    /// relative to the hierarchy root
    pub fn container_cgroup_absolute_path(
        self,
        parent: &str,
        container_id: &str,
    ) -> Result<String, HookError> {
        match self {
            CgroupDriver::Systemd => {
                let parent = if parent.is_empty() {
                    DEFAULT_SYSTEMD_PARENT
                } else {
                    parent
                };
                let slice = expand_slice(parent)?;
                Ok(join_path(&slice, &scope_name(container_id)))
            }
            CgroupDriver::Cgroupfs => {
                let parent = if parent.is_empty() { "/" } else { parent };
                Ok(join_path(parent, &format!("{}-{}", CRIO_PREFIX, container_id)))
            }
        }
    }
}

fn scope_name(name: &str) -> String {
    format!("{}-{}.scope", CRIO_PREFIX, name)
}

fn join_path(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

/// Expand a slice name into its cgroup path
///
/// `a-b-c.slice` lives at `/a.slice/a-b.slice/a-b-c.slice`; `-.slice` is the root.
pub fn expand_slice(slice: &str) -> Result<String, HookError> {
    let invalid = || HookError::CgroupLookup(format!("invalid slice name {:?}", slice));

    if slice.contains('/') {
        return Err(invalid());
    }
    let name = slice.strip_suffix(SLICE_SUFFIX).ok_or_else(invalid)?;
    if name == "-" {
        return Ok("/".to_string());
    }

    let mut path = String::new();
    let mut prefix = String::new();
    for component in name.split('-') {
        if component.is_empty() {
            return Err(invalid());
        }
        path.push('/');
        path.push_str(&prefix);
        path.push_str(component);
        path.push_str(SLICE_SUFFIX);
        prefix.push_str(component);
        prefix.push('-');
    }
    Ok(path)
}

/// Resource update applied to one cgroup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    /// CFS quota in microseconds per period; -1 lifts the limit
    pub cpu_quota: Option<i64>,
    /// CFS period in microseconds (only written together with the quota on v2)
    pub cpu_period: Option<u64>,
}

impl Resources {
    /// Remove the CFS bandwidth limit
    pub fn unlimited_cpu_quota() -> Self {
        Self {
            cpu_quota: Some(-1),
            cpu_period: None,
        }
    }
}

/// Applies resource updates to cgroups named by a driver
pub struct CgroupManager<'a> {
    env: &'a NodeEnv,
    driver: CgroupDriver,
}

impl<'a> CgroupManager<'a> {
    pub fn new(env: &'a NodeEnv, driver: CgroupDriver) -> Self {
        Self { env, driver }
    }

    pub fn driver(&self) -> CgroupDriver {
        self.driver
    }

    /// Path of cgroup `name` under `parent`, relative to the hierarchy root
    ///
    /// With systemd, slices nest by name and anything else is a
    /// `crio-<name>.scope` unit under the expanded parent slice.
    pub fn cgroup_path(&self, name: &str, parent: &str) -> Result<String, HookError> {
        match self.driver {
            CgroupDriver::Systemd => {
                let parent = Path::new(parent)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("");
                let base = if parent.is_empty() {
                    "/".to_string()
                } else {
                    expand_slice(parent)?
                };
                if name.ends_with(SLICE_SUFFIX) {
                    Ok(join_path(&base, name))
                } else {
                    Ok(join_path(&base, &scope_name(name)))
                }
            }
            CgroupDriver::Cgroupfs => Ok(join_path(parent, name)),
        }
    }

    /// Directory holding the CPU bandwidth files of a relative cgroup path
    pub fn cpu_dir(&self, relative: &str) -> PathBuf {
        let root = &self.env.paths.cgroup_root;
        match self.env.cgroup_version {
            CgroupVersion::V1 => join_cgroup(&root.join(V1_CPU_MOUNT), relative),
            CgroupVersion::V2 => join_cgroup(root, relative),
        }
    }

    /// Apply `resources` to cgroup `name` under `parent`
    pub fn set(&self, name: &str, parent: &str, resources: &Resources) -> Result<(), HookError> {
        let relative = self.cgroup_path(name, parent)?;
        let dir = self.cpu_dir(&relative);
        let Some(quota) = resources.cpu_quota else {
            return Ok(());
        };

        debug!(cgroup = %dir.display(), quota, "updating cpu quota");
        match self.env.cgroup_version {
            CgroupVersion::V1 => {
                write_cgroup_file(self.env.fs(), &dir, CPU_CFS_QUOTA_US, &quota.to_string())
            }
            CgroupVersion::V2 => {
                let limit = if quota < 0 {
                    "max".to_string()
                } else {
                    quota.to_string()
                };
                let value = match resources.cpu_period {
                    Some(period) => format!("{} {}", limit, period),
                    None => limit,
                };
                write_cgroup_file(self.env.fs(), &dir, CPU_MAX, &value)
            }
        }
    }
}
