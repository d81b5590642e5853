//! Container and sandbox descriptors
//!
//! The runtime owns these objects; hooks only read them, except for the
//! environment injected by the shared-CPU step, which is written back through
//! [`Container::set_spec`].
//!
//! The structs mirror the subset of the OCI runtime spec the hooks look at and
//! deserialize from the same JSON field names.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::HookError;
use crate::hooks::HookState;

/// CPU resources of a container (`linux.resources.cpu`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinuxCpu {
    /// CPU list in kernel list format, e.g. "2-3"
    pub cpus: String,
    pub shares: Option<u64>,
    pub period: Option<u64>,
    pub quota: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinuxResources {
    pub cpu: Option<LinuxCpu>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Linux {
    pub resources: Option<LinuxResources>,
    pub cgroups_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Process {
    pub env: Vec<String>,
}

/// The parts of the container runtime spec used by the hooks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSpec {
    pub process: Option<Process>,
    pub linux: Option<Linux>,
}

impl ContainerSpec {
    /// CPU resources, if the spec carries any
    pub fn cpu(&self) -> Option<&LinuxCpu> {
        self.linux.as_ref()?.resources.as_ref()?.cpu.as_ref()
    }

    /// The allocated CPU list, `None` when missing or empty
    pub fn cpus(&self) -> Option<&str> {
        self.cpu()
            .map(|cpu| cpu.cpus.as_str())
            .filter(|cpus| !cpus.is_empty())
    }

    /// Append `KEY=value` entries to the process environment
    pub fn push_env(&mut self, vars: impl IntoIterator<Item = String>) {
        self.process.get_or_insert_with(Process::default).env.extend(vars);
    }
}

/// Accessor for a container managed by the runtime
pub trait Container {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    /// PID of the container init process
    fn pid(&self) -> Result<u32, HookError>;
    fn spec(&self) -> ContainerSpec;
    fn set_spec(&mut self, spec: ContainerSpec);
}

/// Accessor for the pod sandbox a container belongs to
pub trait Sandbox {
    fn annotations(&self) -> &HashMap<String, String>;
    fn cgroup_parent(&self) -> &str;
}

/// Serializable container record, as exchanged with the CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerState {
    pub id: String,
    pub name: String,
    pub pid: Option<u32>,
    pub spec: ContainerSpec,
    /// Hooks already run for this container; advanced by each CLI invocation
    pub lifecycle: HookState,
}

impl Container for ContainerState {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> Result<u32, HookError> {
        self.pid.ok_or_else(|| {
            HookError::CgroupLookup(format!("failed to get pid of container {}", self.id))
        })
    }

    fn spec(&self) -> ContainerSpec {
        self.spec.clone()
    }

    fn set_spec(&mut self, spec: ContainerSpec) {
        self.spec = spec;
    }
}

/// Serializable pod sandbox record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodSandbox {
    pub annotations: HashMap<String, String>,
    pub cgroup_parent: String,
}

impl Sandbox for PodSandbox {
    fn annotations(&self) -> &HashMap<String, String> {
        &self.annotations
    }

    fn cgroup_parent(&self) -> &str {
        &self.cgroup_parent
    }
}
