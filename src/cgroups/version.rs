//! cgroup ABI detection
//!
//! The node runs either the legacy per-controller hierarchies (v1) or the
//! unified hierarchy (v2). The version is detected once when the hook
//! environment is built and then selects the strategy of every cgroup step.

use std::path::Path;

use nix::sys::statfs::{statfs, CGROUP2_SUPER_MAGIC};
use serde::{Deserialize, Serialize};

use crate::error::HookError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupVersion {
    V1,
    V2,
}

impl CgroupVersion {
    /// Probe the filesystem mounted at `cgroup_root`
    pub fn detect(cgroup_root: &Path) -> Result<Self, HookError> {
        let stat = statfs(cgroup_root)
            .map_err(|e| HookError::io(cgroup_root, std::io::Error::from(e)))?;
        if stat.filesystem_type() == CGROUP2_SUPER_MAGIC {
            Ok(CgroupVersion::V2)
        } else {
            Ok(CgroupVersion::V1)
        }
    }

    /// CFS quota file for this ABI
    pub fn quota_file(self) -> &'static str {
        match self {
            CgroupVersion::V1 => super::CPU_CFS_QUOTA_US,
            CgroupVersion::V2 => super::CPU_MAX,
        }
    }
}

impl std::fmt::Display for CgroupVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CgroupVersion::V1 => write!(f, "v1"),
            CgroupVersion::V2 => write!(f, "v2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_file_per_version() {
        assert_eq!(CgroupVersion::V1.quota_file(), "cpu.cfs_quota_us");
        assert_eq!(CgroupVersion::V2.quota_file(), "cpu.max");
    }

    #[test]
    fn test_plain_directory_is_not_cgroup2() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(CgroupVersion::detect(dir.path()).unwrap(), CgroupVersion::V1);
    }

    #[test]
    fn test_serde_names() {
        let v: CgroupVersion = serde_json::from_str("\"v2\"").unwrap();
        assert_eq!(v, CgroupVersion::V2);
    }
}
