//! Shared helpers for the integration tests
//!
//! Mirrors `src/testutil.rs`, which is compiled only into the unit tests.
//!
//! A node is a temporary directory laid out like the host:
//!
//! ```text
//! <tmp>/cgroup/...                  cgroup root
//! <tmp>/proc/<pid>/cgroup           container process cgroups
//! <tmp>/proc/irq/default_smp_affinity
//! <tmp>/sys/cpu/cpu<N>/...          sysfs CPU knobs
//! <tmp>/run/cpu/cpu<N>/...          saved knob values
//! <tmp>/etc/irqbalance              irqbalance environment file
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cpushield::cgroups::CgroupVersion;
use cpushield::container::{Linux, LinuxCpu, LinuxResources};
use cpushield::node::{HostFs, KernelFs, NodePaths, ServiceManager};
use cpushield::{ContainerSpec, ContainerState, HookError, NodeEnv, PodSandbox};
use tempfile::TempDir;

pub const PID: u32 = 4242;

/// Host filesystem recording every write, with optional injected failures
#[derive(Default)]
pub struct RecordingFs {
    writes: Mutex<Vec<PathBuf>>,
    fail_on: Mutex<Option<PathBuf>>,
}

impl RecordingFs {
    pub fn fail_writes_to(&self, path: PathBuf) {
        *self.fail_on.lock().unwrap() = Some(path);
    }

    pub fn writes(&self) -> Vec<PathBuf> {
        self.writes.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.writes.lock().unwrap().clear();
    }
}

impl KernelFs for RecordingFs {
    fn read(&self, path: &Path) -> io::Result<String> {
        HostFs.read(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        if self.fail_on.lock().unwrap().as_deref() == Some(path) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.writes.lock().unwrap().push(path.to_path_buf());
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

/// Records daemon interactions instead of running systemctl
#[derive(Default)]
pub struct FakeServices {
    pub enabled: bool,
    pub binary: bool,
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

pub struct TestNode {
    pub dir: TempDir,
    pub fs: Arc<RecordingFs>,
    pub services: Arc<FakeServices>,
    pub env: NodeEnv,
}

impl TestNode {
    pub fn new(version: CgroupVersion, services: FakeServices) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for sub in ["cgroup", "proc/irq", "etc", "sys/cpu"] {
            std::fs::create_dir_all(root.join(sub)).unwrap();
        }
        let paths = NodePaths {
            cgroup_root: root.join("cgroup"),
            proc_root: root.join("proc"),
            sys_cpu_dir: root.join("sys/cpu"),
            cpu_save_dir: root.join("run/cpu"),
            irq_smp_affinity_file: root.join("proc/irq/default_smp_affinity"),
            irqbalance_config_file: root.join("etc/irqbalance"),
            irqbalance_banned_cpus_file: root.join("etc/orig_irq_banned_cpus"),
        };
        let fs = Arc::new(RecordingFs::default());
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

    /// Lay out a v2 cgroup chain for `cgroup` ("/a/b/c") with every level
    /// holding `cpus` and an empty exclusive list
    pub fn v2_cgroup(&self, cgroup: &str, cpus: &str) {
        self.write(&format!("proc/{}/cgroup", PID), &format!("0::{}\n", cgroup));
        let mut current = String::from("cgroup");
        for component in cgroup.split('/').filter(|c| !c.is_empty()) {
            current = format!("{}/{}", current, component);
            self.write(&format!("{}/cpuset.cpus", current), cpus);
            self.write(&format!("{}/cpuset.cpus.exclusive", current), "");
            self.write(&format!("{}/cpuset.cpus.partition", current), "member");
            self.write(&format!("{}/cpu.max", current), "max 100000");
        }
    }

    /// sysfs knobs of `cpus`
    pub fn cpus(&self, cpus: &[usize]) {
        for cpu in cpus {
            self.write(&format!("sys/cpu/cpu{}/cpufreq/scaling_governor", cpu), "powersave");
            self.write(
                &format!("sys/cpu/cpu{}/cpufreq/scaling_available_governors", cpu),
                "performance powersave schedutil",
            );
            self.write(&format!("sys/cpu/cpu{}/power/pm_qos_resume_latency_us", cpu), "0");
        }
    }
}

pub fn container(cpus: &str, shares: u64) -> ContainerState {
    ContainerState {
        id: "abc".to_string(),
        name: "app".to_string(),
        pid: Some(PID),
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

pub fn sandbox(parent: &str, annotations: &[(&str, &str)]) -> PodSandbox {
    PodSandbox {
        annotations: annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        cgroup_parent: parent.to_string(),
    }
}
