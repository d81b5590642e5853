//! Hook configuration
//!
//! Loaded from a JSON file; every field is optional and falls back to the
//! host defaults:
//!
//! ```json
//! {
//!   "shared_cpuset": "0-1",
//!   "cgroup_version": "auto",
//!   "lock_file": "/var/run/cpushield/hooks.lock",
//!   "metrics_file": "/var/lib/node_exporter/textfile/cpushield.prom",
//!   "runtimes": {
//!     "performance": { "allowed_annotations": ["cpu-load-balancing.crio.io"] }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cgroups::CgroupVersion;
use crate::cpuset::CpuSet;
use crate::error::HookError;
use crate::node::{NodeEnv, NodePaths};

/// Which cgroup ABI to assume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupVersionSetting {
    /// Probe the cgroup mount
    #[default]
    Auto,
    V1,
    V2,
}

/// Per runtime handler settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeHandler {
    /// Annotations pods running with this handler may use
    pub allowed_annotations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub cgroup_root: PathBuf,
    pub proc_root: PathBuf,
    pub sys_cpu_dir: PathBuf,
    pub cpu_save_dir: PathBuf,
    pub irq_smp_affinity_file: PathBuf,
    pub irqbalance_config_file: PathBuf,
    pub irqbalance_banned_cpus_file: PathBuf,
    /// CPUs containers may share on top of their exclusive CPUs
    pub shared_cpuset: Option<String>,
    pub cgroup_version: CgroupVersionSetting,
    /// Node-wide lock held around each hook; no locking when unset
    pub lock_file: Option<PathBuf>,
    /// Prometheus textfile the counters of every invocation are folded into
    pub metrics_file: Option<PathBuf>,
    pub runtimes: HashMap<String, RuntimeHandler>,
}

impl Default for HooksConfig {
    fn default() -> Self {
        let paths = NodePaths::default();
        Self {
            cgroup_root: paths.cgroup_root,
            proc_root: paths.proc_root,
            sys_cpu_dir: paths.sys_cpu_dir,
            cpu_save_dir: paths.cpu_save_dir,
            irq_smp_affinity_file: paths.irq_smp_affinity_file,
            irqbalance_config_file: paths.irqbalance_config_file,
            irqbalance_banned_cpus_file: paths.irqbalance_banned_cpus_file,
            shared_cpuset: None,
            cgroup_version: CgroupVersionSetting::Auto,
            lock_file: None,
            metrics_file: None,
            runtimes: HashMap::new(),
        }
    }
}

impl HooksConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, HookError> {
        let content = fs::read_to_string(path).map_err(|e| HookError::io(path, e))?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "loaded hooks config");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, HookError> {
        if content.trim().is_empty() {
            return Err(HookError::Config("the config file is empty".to_string()));
        }
        let config: Self =
            serde_json::from_str(content).map_err(|e| HookError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HookError> {
        for (name, path) in [
            ("cgroup_root", &self.cgroup_root),
            ("proc_root", &self.proc_root),
            ("sys_cpu_dir", &self.sys_cpu_dir),
            ("cpu_save_dir", &self.cpu_save_dir),
            ("irq_smp_affinity_file", &self.irq_smp_affinity_file),
            ("irqbalance_config_file", &self.irqbalance_config_file),
            ("irqbalance_banned_cpus_file", &self.irqbalance_banned_cpus_file),
        ] {
            if !path.is_absolute() {
                return Err(HookError::Config(format!(
                    "{} must be an absolute path, got {}",
                    name,
                    path.display()
                )));
            }
        }
        for (name, path) in [("lock_file", &self.lock_file), ("metrics_file", &self.metrics_file)] {
            if let Some(path) = path.as_ref().filter(|p| !p.is_absolute()) {
                return Err(HookError::Config(format!(
                    "{} must be an absolute path, got {}",
                    name,
                    path.display()
                )));
            }
        }
        self.shared_cpus()?;
        Ok(())
    }

    /// The configured shared CPUs; `None` when unset or empty
    pub fn shared_cpus(&self) -> Result<Option<CpuSet>, HookError> {
        let Some(list) = self.shared_cpuset.as_deref() else {
            return Ok(None);
        };
        let cpus = CpuSet::parse(list)
            .map_err(|e| HookError::Config(format!("shared_cpuset: {}", e)))?;
        Ok(if cpus.is_empty() { None } else { Some(cpus) })
    }

    /// Whether `handler` lets pods use `annotation`
    pub fn handler_allows(&self, handler: &str, annotation: &str) -> bool {
        self.runtimes
            .get(handler)
            .map(|r| r.allowed_annotations.iter().any(|a| a == annotation))
            .unwrap_or(false)
    }

    /// Whether any configured handler lets pods use `annotation`
    pub fn any_handler_allows(&self, annotation: &str) -> bool {
        self.runtimes
            .values()
            .any(|r| r.allowed_annotations.iter().any(|a| a == annotation))
    }

    pub fn node_paths(&self) -> NodePaths {
        NodePaths {
            cgroup_root: self.cgroup_root.clone(),
            proc_root: self.proc_root.clone(),
            sys_cpu_dir: self.sys_cpu_dir.clone(),
            cpu_save_dir: self.cpu_save_dir.clone(),
            irq_smp_affinity_file: self.irq_smp_affinity_file.clone(),
            irqbalance_config_file: self.irqbalance_config_file.clone(),
            irqbalance_banned_cpus_file: self.irqbalance_banned_cpus_file.clone(),
        }
    }

    /// Resolve the cgroup version, probing the mount when set to auto
    pub fn cgroup_version(&self) -> Result<CgroupVersion, HookError> {
        match self.cgroup_version {
            CgroupVersionSetting::V1 => Ok(CgroupVersion::V1),
            CgroupVersionSetting::V2 => Ok(CgroupVersion::V2),
            CgroupVersionSetting::Auto => CgroupVersion::detect(&self.cgroup_root),
        }
    }

    /// Node environment backed by the real filesystem and systemd
    pub fn to_node_env(&self) -> Result<NodeEnv, HookError> {
        Ok(NodeEnv::host(self.node_paths(), self.cgroup_version()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_partial_file() {
        let config = HooksConfig::parse(r#"{ "shared_cpuset": "0-1", "cgroup_version": "v2" }"#)
            .unwrap();
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
        assert_eq!(
            config.irqbalance_config_file,
            PathBuf::from("/etc/sysconfig/irqbalance")
        );
        assert_eq!(config.cgroup_version().unwrap(), CgroupVersion::V2);
        assert_eq!(config.shared_cpus().unwrap().unwrap().to_string(), "0-1");
        assert!(config.lock_file.is_none());
        assert!(config.metrics_file.is_none());
    }

    #[test]
    fn test_runtime_handlers() {
        let config = HooksConfig::parse(
            r#"{
                "runtimes": {
                    "performance": { "allowed_annotations": ["cpu-load-balancing.crio.io"] },
                    "runc": {}
                }
            }"#,
        )
        .unwrap();
        assert!(config.handler_allows("performance", "cpu-load-balancing.crio.io"));
        assert!(!config.handler_allows("runc", "cpu-load-balancing.crio.io"));
        assert!(!config.handler_allows("missing", "cpu-load-balancing.crio.io"));
        assert!(config.any_handler_allows("cpu-load-balancing.crio.io"));
        assert!(!config.any_handler_allows("cpu-quota.crio.io"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            HooksConfig::parse(r#"{ "shared_cpuset": "3-1" }"#),
            Err(HookError::Config(_))
        ));
        assert!(matches!(
            HooksConfig::parse(r#"{ "cpu_save_dir": "run/cpu" }"#),
            Err(HookError::Config(_))
        ));
        assert!(matches!(
            HooksConfig::parse(r#"{ "cgroup_version": "v3" }"#),
            Err(HookError::Config(_))
        ));
        assert!(matches!(
            HooksConfig::parse(r#"{ "metrics_file": "cpushield.prom" }"#),
            Err(HookError::Config(_))
        ));
        assert!(HooksConfig::parse("").is_err());
    }

    #[test]
    fn test_empty_shared_cpuset_is_none() {
        let config = HooksConfig::parse(r#"{ "shared_cpuset": "" }"#).unwrap();
        assert!(config.shared_cpus().unwrap().is_none());
    }
}
