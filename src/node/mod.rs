//! Node-level resources the hooks operate on
//!
//! Everything "global" the hooks touch is a file or a service on the node.
//! [`NodeEnv`] bundles where those files live, which cgroup ABI the node runs,
//! and the capabilities used to reach them, so one hook invocation carries no
//! other state.

pub mod fs;
pub mod lock;
pub mod service;

use std::path::PathBuf;
use std::sync::Arc;

pub use fs::{read_cgroup_file, write_cgroup_file, HostFs, KernelFs};
pub use lock::NodeLock;
pub use service::{ServiceManager, Systemctl};

use crate::cgroups::CgroupVersion;

/// Locations of the kernel interfaces and runtime-private state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePaths {
    /// cgroup mount point, e.g. /sys/fs/cgroup
    pub cgroup_root: PathBuf,
    /// procfs mount point, e.g. /proc
    pub proc_root: PathBuf,
    /// sysfs CPU directory, e.g. /sys/devices/system/cpu
    pub sys_cpu_dir: PathBuf,
    /// Where original power knob values are saved
    pub cpu_save_dir: PathBuf,
    /// Node-wide default IRQ affinity mask
    pub irq_smp_affinity_file: PathBuf,
    /// irqbalance environment file holding IRQBALANCE_BANNED_CPUS
    pub irqbalance_config_file: PathBuf,
    /// Backup of the banned CPU mask taken at first boot
    pub irqbalance_banned_cpus_file: PathBuf,
}

impl Default for NodePaths {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            proc_root: PathBuf::from("/proc"),
            sys_cpu_dir: PathBuf::from("/sys/devices/system/cpu"),
            cpu_save_dir: PathBuf::from("/var/run/cpushield/cpu"),
            irq_smp_affinity_file: PathBuf::from("/proc/irq/default_smp_affinity"),
            irqbalance_config_file: PathBuf::from("/etc/sysconfig/irqbalance"),
            irqbalance_banned_cpus_file: PathBuf::from("/etc/sysconfig/orig_irq_banned_cpus"),
        }
    }
}

/// Everything a hook needs to reach node state
#[derive(Clone)]
pub struct NodeEnv {
    pub paths: NodePaths,
    pub cgroup_version: CgroupVersion,
    pub fs: Arc<dyn KernelFs>,
    pub services: Arc<dyn ServiceManager>,
}

impl NodeEnv {
    pub fn new(
        paths: NodePaths,
        cgroup_version: CgroupVersion,
        fs: Arc<dyn KernelFs>,
        services: Arc<dyn ServiceManager>,
    ) -> Self {
        Self {
            paths,
            cgroup_version,
            fs,
            services,
        }
    }

    /// Real filesystem and systemd
    pub fn host(paths: NodePaths, cgroup_version: CgroupVersion) -> Self {
        Self::new(paths, cgroup_version, Arc::new(HostFs), Arc::new(Systemctl))
    }

    pub fn fs(&self) -> &dyn KernelFs {
        self.fs.as_ref()
    }

    pub fn is_cgroup_v2(&self) -> bool {
        self.cgroup_version == CgroupVersion::V2
    }
}

impl std::fmt::Debug for NodeEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeEnv")
            .field("paths", &self.paths)
            .field("cgroup_version", &self.cgroup_version)
            .finish()
    }
}
