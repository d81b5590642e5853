//! Locating the cgroups of a running container
//!
//! `/proc/<pid>/cgroup` lists one line per hierarchy:
//!
//! ```text
//! v1:  4:cpuset:/kubepods.slice/kubepods-pod1.slice/crio-abc.scope
//!      3:cpu,cpuacct:/kubepods.slice/kubepods-pod1.slice/crio-abc.scope
//! v2:  0::/kubepods.slice/kubepods-pod1.slice/crio-abc.scope
//! ```
//!
//! The container cgroup is the listed path; the pod cgroup is its parent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{join_cgroup, CgroupDriver, CgroupVersion};
use crate::container::{Container, Sandbox};
use crate::error::HookError;
use crate::node::NodeEnv;

/// Key of the unified hierarchy in `/proc/<pid>/cgroup`
const UNIFIED: &str = "";

/// Where one controller of a process lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerPath {
    /// Directory under the cgroup root the hierarchy is mounted at (v1), e.g. "cpu,cpuacct"
    pub mount: String,
    /// Cgroup path relative to the hierarchy root
    pub path: String,
}

/// Parse `/proc/<pid>/cgroup` into controller name -> path
///
/// Co-mounted v1 controllers ("cpu,cpuacct") are listed under each of their
/// names; the v2 hierarchy is listed under the empty name.
pub fn parse_proc_cgroup(content: &str) -> Result<HashMap<String, ControllerPath>, HookError> {
    let mut controllers = HashMap::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let mut parts = line.splitn(3, ':');
        let (_id, names, path) = match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(names), Some(path)) => (id, names, path),
            _ => {
                return Err(HookError::CgroupLookup(format!(
                    "malformed cgroup line {:?}",
                    line
                )))
            }
        };

        let entry = ControllerPath {
            mount: names.to_string(),
            path: path.to_string(),
        };
        if names.is_empty() {
            controllers.insert(UNIFIED.to_string(), entry);
            continue;
        }
        for name in names.split(',') {
            controllers.insert(name.to_string(), entry.clone());
        }
    }
    Ok(controllers)
}

/// Pod- and container-level cgroup directories of one container
#[derive(Debug, Clone)]
pub struct CgroupHierarchy {
    version: CgroupVersion,
    root: PathBuf,
    controllers: HashMap<String, ControllerPath>,
}

impl CgroupHierarchy {
    pub fn new(
        version: CgroupVersion,
        root: impl Into<PathBuf>,
        controllers: HashMap<String, ControllerPath>,
    ) -> Self {
        Self {
            version,
            root: root.into(),
            controllers,
        }
    }

    /// Build the hierarchy of process `pid` from procfs
    pub fn from_pid(env: &NodeEnv, pid: u32) -> Result<Self, HookError> {
        let path = env.paths.proc_root.join(pid.to_string()).join("cgroup");
        let content = env.fs().read(&path).map_err(|e| HookError::io(&path, e))?;
        Ok(Self::new(
            env.cgroup_version,
            &env.paths.cgroup_root,
            parse_proc_cgroup(&content)?,
        ))
    }

    fn entry(&self, controller: &str) -> Result<&ControllerPath, HookError> {
        let key = match self.version {
            CgroupVersion::V1 => controller,
            CgroupVersion::V2 => UNIFIED,
        };
        self.controllers.get(key).ok_or_else(|| {
            HookError::CgroupLookup(format!("no cgroup found for controller {:?}", controller))
        })
    }

    /// Container cgroup path relative to the hierarchy root
    pub fn container_path(&self, controller: &str) -> Result<&str, HookError> {
        Ok(self.entry(controller)?.path.as_str())
    }

    pub fn absolute_container_path(&self, controller: &str) -> Result<PathBuf, HookError> {
        let entry = self.entry(controller)?;
        let base = match self.version {
            CgroupVersion::V1 => self.root.join(&entry.mount),
            CgroupVersion::V2 => self.root.clone(),
        };
        Ok(join_cgroup(&base, &entry.path))
    }

    pub fn absolute_pod_path(&self, controller: &str) -> Result<PathBuf, HookError> {
        let container = self.absolute_container_path(controller)?;
        container
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                HookError::CgroupLookup(format!(
                    "container cgroup {} has no parent",
                    container.display()
                ))
            })
    }
}

/// Relative cpuset cgroup path of a container
///
/// Uses the live process when there is one. Once the process is gone (post
/// stop), falls back to the path the cgroup driver derives from the sandbox
/// cgroup parent.
pub fn cpuset_of_container(
    env: &NodeEnv,
    container: &dyn Container,
    sandbox: &dyn Sandbox,
) -> Result<String, HookError> {
    let from_proc = container
        .pid()
        .and_then(|pid| CgroupHierarchy::from_pid(env, pid))
        .and_then(|h| h.container_path("cpuset").map(str::to_string));

    match from_proc {
        Ok(path) => Ok(path),
        Err(e) => {
            debug!(
                container_id = container.id(),
                error = %e,
                "container process cgroup unavailable, deriving cgroup from parent"
            );
            CgroupDriver::for_parent(sandbox.cgroup_parent())
                .container_cgroup_absolute_path(sandbox.cgroup_parent(), container.id())
        }
    }
}
