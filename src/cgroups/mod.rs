//! cgroup access for the CPU isolation hooks
//!
//! The hooks work on both kernel cgroup ABIs:
//!
//! ```text
//! v1: /sys/fs/cgroup/cpuset/<path>/cpuset.sched_load_balance
//!     /sys/fs/cgroup/cpu,cpuacct/<path>/cpu.cfs_quota_us
//!
//! v2: /sys/fs/cgroup/<path>/cpuset.cpus
//!                          /cpuset.cpus.exclusive
//!                          /cpuset.cpus.partition
//!                          /cpu.max
//! ```
//!
//! - `version` - which ABI the node runs
//! - `hierarchy` - pod and container cgroup directories of a running container
//! - `manager` - cgroup drivers (systemd / cgroupfs) and resource updates

pub mod hierarchy;
pub mod manager;
pub mod version;

use std::path::{Path, PathBuf};

pub use hierarchy::{cpuset_of_container, parse_proc_cgroup, CgroupHierarchy};
pub use manager::{expand_slice, CgroupDriver, CgroupManager, Resources};
pub use version::CgroupVersion;

pub const CPUSET_CPUS: &str = "cpuset.cpus";
pub const CPUSET_CPUS_EXCLUSIVE: &str = "cpuset.cpus.exclusive";
pub const CPUSET_CPUS_PARTITION: &str = "cpuset.cpus.partition";
pub const CPUSET_SCHED_LOAD_BALANCE: &str = "cpuset.sched_load_balance";
pub const CGROUP_SUBTREE_CONTROL: &str = "cgroup.subtree_control";
pub const CPU_CFS_QUOTA_US: &str = "cpu.cfs_quota_us";
pub const CPU_MAX: &str = "cpu.max";

/// v1 mount directory of the cpuset controller
pub const V1_CPUSET_MOUNT: &str = "cpuset";
/// v1 mount directory of the cpu controller
pub const V1_CPU_MOUNT: &str = "cpu";

/// Join a cgroup path ("/a/b") below a directory
///
/// `Path::join` would replace the base with an absolute path, so the leading
/// slash is dropped first.
pub fn join_cgroup(base: &Path, cgroup: &str) -> PathBuf {
    let relative = cgroup.trim_start_matches('/');
    if relative.is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}
