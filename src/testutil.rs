//! Shared fixtures for unit tests
//!
//! `tests/common` has its own node fixture: integration tests link the
//! library without `cfg(test)`, so nothing here is visible to them. The two
//! differ where the tests need them to: unit tests count writes and inject
//! `InvalidInput`, integration tests record written paths and inject `EINVAL`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::cgroups::CgroupVersion;
use crate::container::{ContainerSpec, ContainerState, Linux, LinuxCpu, LinuxResources, PodSandbox};
use crate::error::HookError;
use crate::node::{HostFs, KernelFs, NodeEnv, NodePaths, ServiceManager};

/// Host filesystem that counts writes and fails writes to one path
#[derive(Default)]
pub struct FaultyFs {
    pub fail_write: Mutex<Option<PathBuf>>,
    pub writes: AtomicUsize,
}

impl FaultyFs {
    pub fn fail_writes_to(&self, path: impl Into<PathBuf>) {
        *self.fail_write.lock().unwrap() = Some(path.into());
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl KernelFs for FaultyFs {
    fn read(&self, path: &Path) -> io::Result<String> {
        HostFs.read(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        if self.fail_write.lock().unwrap().as_deref() == Some(path) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "injected failure"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        HostFs.write(path, contents)
    }

    fn exists(&self, path: &Path) -> bool {
        HostFs.exists(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        HostFs.create_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        HostFs.create_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        HostFs.remove_file(path)
    }
}

/// Service manager recording every call
#[derive(Default)]
pub struct FakeServices {
    pub enabled: bool,
    pub binary: bool,
    pub fail_restart: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeServices {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ServiceManager for FakeServices {
    fn is_enabled(&self, _name: &str) -> bool {
        self.enabled
    }

    fn restart(&self, name: &str) -> Result<(), HookError> {
        self.calls.lock().unwrap().push(format!("restart {}", name));
        if self.fail_restart {
            return Err(HookError::Command {
                program: "systemctl".to_string(),
                message: "unit not found".to_string(),
            });
        }
        Ok(())
    }

    fn binary_available(&self, _name: &str) -> bool {
        self.binary
    }

    fn run_oneshot(&self, name: &str, env: &[(&str, &str)]) -> Result<(), HookError> {
        let vars: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        self.calls
            .lock()
            .unwrap()
            .push(format!("oneshot {} {}", name, vars.join(" ")));
        Ok(())
    }
}

/// A temporary node tree with its environment
pub struct Node {
    pub dir: TempDir,
    pub fs: Arc<FaultyFs>,
    pub services: Arc<FakeServices>,
    pub env: NodeEnv,
}

impl Node {
    pub fn new(version: CgroupVersion) -> Self {
        Self::with_services(version, FakeServices::default())
    }

    pub fn with_services(version: CgroupVersion, services: FakeServices) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let paths = NodePaths {
            cgroup_root: root.join("cgroup"),
            proc_root: root.join("proc"),
            sys_cpu_dir: root.join("sys/cpu"),
            cpu_save_dir: root.join("run/cpu"),
            irq_smp_affinity_file: root.join("proc/irq/default_smp_affinity"),
            irqbalance_config_file: root.join("etc/irqbalance"),
            irqbalance_banned_cpus_file: root.join("etc/orig_irq_banned_cpus"),
        };
        std::fs::create_dir_all(&paths.cgroup_root).unwrap();
        std::fs::create_dir_all(root.join("proc/irq")).unwrap();
        std::fs::create_dir_all(root.join("etc")).unwrap();

        let fs = Arc::new(FaultyFs::default());
        let services = Arc::new(services);
        let env = NodeEnv::new(paths, version, fs.clone(), services.clone());
        Self {
            dir,
            fs,
            services,
            env,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.path(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.path(relative)).unwrap()
    }

    /// Register `/proc/<pid>/cgroup` for a process
    pub fn set_proc_cgroup(&self, pid: u32, content: &str) {
        self.write(&format!("proc/{}/cgroup", pid), content);
    }
}

pub fn container(id: &str, cpus: &str, shares: u64) -> ContainerState {
    ContainerState {
        id: id.to_string(),
        name: "app".to_string(),
        pid: Some(4242),
        spec: ContainerSpec {
            linux: Some(Linux {
                resources: Some(LinuxResources {
                    cpu: Some(LinuxCpu {
                        cpus: cpus.to_string(),
                        shares: Some(shares),
                        period: Some(100_000),
                        quota: None,
                    }),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        lifecycle: Default::default(),
    }
}

pub fn sandbox(parent: &str, pairs: &[(&str, &str)]) -> PodSandbox {
    PodSandbox {
        annotations: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        cgroup_parent: parent.to_string(),
    }
}
