//! Per-CPU power knobs with save and restore
//!
//! A knob is a sysfs file below `cpu<N>/`. Applying a value first copies the
//! live value to the same relative path below the save directory; an empty
//! value restores the copy and deletes it:
//!
//! ```text
//! /sys/devices/system/cpu/cpu4/cpufreq/scaling_governor     live
//! /var/run/cpushield/cpu/cpu4/cpufreq/scaling_governor      saved original
//! ```
//!
//! CPUs are processed in order and a failure stops the loop; CPUs handled
//! before the failure keep their new value.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::container::Container;
use crate::cpuset::CpuSet;
use crate::error::HookError;
use crate::node::NodeEnv;

/// Checks a requested value against what a CPU supports
pub type KnobValidator = fn(env: &NodeEnv, cpu: usize, value: &str) -> Result<(), HookError>;

/// One per-CPU sysfs knob
#[derive(Debug, Clone, Copy)]
pub struct CpuKnob {
    pub name: &'static str,
    /// Path below `cpu<N>/`
    pub relative_path: &'static str,
    pub validate: Option<KnobValidator>,
}

/// C-state floor: "0" allows every state, "n/a" pins the CPU to C0
pub const PM_QOS_RESUME_LATENCY: CpuKnob = CpuKnob {
    name: "pm_qos_resume_latency",
    relative_path: "power/pm_qos_resume_latency_us",
    validate: None,
};

pub const SCALING_GOVERNOR: CpuKnob = CpuKnob {
    name: "scaling_governor",
    relative_path: "cpufreq/scaling_governor",
    validate: Some(validate_governor),
};

const SCALING_AVAILABLE_GOVERNORS: &str = "cpufreq/scaling_available_governors";

impl CpuKnob {
    fn live_path(&self, env: &NodeEnv, cpu: usize) -> PathBuf {
        env.paths
            .sys_cpu_dir
            .join(format!("cpu{}", cpu))
            .join(self.relative_path)
    }

    fn save_path(&self, env: &NodeEnv, cpu: usize) -> PathBuf {
        env.paths
            .cpu_save_dir
            .join(format!("cpu{}", cpu))
            .join(self.relative_path)
    }

    /// Set `value` on every container CPU, or restore the saved values when
    /// `value` is empty
    pub fn apply(&self, env: &NodeEnv, container: &dyn Container, value: &str) -> Result<(), HookError> {
        let spec = container.spec();
        let cpus = spec.cpus().ok_or_else(|| HookError::MissingCpus {
            container: container.id().to_string(),
        })?;
        let cpus = CpuSet::parse(cpus)?;

        for cpu in cpus.iter() {
            if value.is_empty() {
                self.restore(env, cpu)?;
            } else {
                self.set(env, cpu, value)?;
            }
        }
        info!(
            container_id = container.id(),
            knob = self.name,
            value,
            cpus = %cpus,
            "updated cpu power knob"
        );
        Ok(())
    }

    fn set(&self, env: &NodeEnv, cpu: usize, value: &str) -> Result<(), HookError> {
        let live = self.live_path(env, cpu);
        let original = env.fs().read(&live).map_err(|e| HookError::io(&live, e))?;

        if let Some(validate) = self.validate {
            validate(env, cpu, value)?;
        }

        let saved = self.save_path(env, cpu);
        if let Some(dir) = saved.parent() {
            env.fs()
                .create_dir_all(dir)
                .map_err(|e| HookError::io(dir, e))?;
        }
        env.fs()
            .write(&saved, &original)
            .map_err(|e| HookError::io(&saved, e))?;
        env.fs()
            .write(&live, value)
            .map_err(|e| HookError::io(&live, e))
    }

    fn restore(&self, env: &NodeEnv, cpu: usize) -> Result<(), HookError> {
        let saved = self.save_path(env, cpu);
        let original = match env.fs().read(&saved) {
            Ok(original) => original,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(knob = self.name, cpu, "nothing saved, already restored");
                return Ok(());
            }
            Err(e) => return Err(HookError::io(&saved, e)),
        };

        let live = self.live_path(env, cpu);
        env.fs()
            .write(&live, &original)
            .map_err(|e| HookError::io(&live, e))?;
        env.fs()
            .remove_file(&saved)
            .map_err(|e| HookError::io(&saved, e))
    }
}

fn validate_governor(env: &NodeEnv, cpu: usize, governor: &str) -> Result<(), HookError> {
    let path = env
        .paths
        .sys_cpu_dir
        .join(format!("cpu{}", cpu))
        .join(SCALING_AVAILABLE_GOVERNORS);
    let available = env.fs().read(&path).map_err(|e| HookError::io(&path, e))?;
    if available.split_whitespace().any(|g| g == governor) {
        return Ok(());
    }
    Err(HookError::GovernorUnavailable {
        governor: governor.to_string(),
        cpu,
    })
}

/// Set (or restore, with "") the PM-QoS resume latency of the container CPUs
pub fn set_cpu_pm_qos_resume_latency(
    env: &NodeEnv,
    container: &dyn Container,
    latency: &str,
) -> Result<(), HookError> {
    PM_QOS_RESUME_LATENCY.apply(env, container, latency)
}

/// Set (or restore, with "") the scaling governor of the container CPUs
pub fn set_cpu_freq_governor(
    env: &NodeEnv,
    container: &dyn Container,
    governor: &str,
) -> Result<(), HookError> {
    SCALING_GOVERNOR.apply(env, container, governor)
}
