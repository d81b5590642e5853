//! Pod annotations that request CPU isolation features
//!
//! Each feature has its own annotation key. The policy is a pure lookup: no
//! validation across directives happens here, the hook order settles conflicts.

use std::collections::HashMap;

use tracing::warn;

use crate::container::{ContainerSpec, Sandbox};
use crate::eligibility::should_run_hooks;
use crate::error::HookError;

/// Disable CPU load balancing for the container CPUs
pub const CPU_LOAD_BALANCING_ANNOTATION: &str = "cpu-load-balancing.crio.io";
/// Disable the CFS quota of the container and its pod
pub const CPU_QUOTA_ANNOTATION: &str = "cpu-quota.crio.io";
/// Steer IRQs away from the container CPUs
pub const IRQ_LOAD_BALANCING_ANNOTATION: &str = "irq-load-balancing.crio.io";
/// Enable or disable deep C-states on the container CPUs
pub const CPU_C_STATES_ANNOTATION: &str = "cpu-c-states.crio.io";
/// Pin the frequency governor of the container CPUs
pub const CPU_FREQ_GOVERNOR_ANNOTATION: &str = "cpu-freq-governor.crio.io";
/// Prefix of the per-container shared CPU request (`<prefix>/<container-name>`)
pub const CPU_SHARED_ANNOTATION: &str = "cpu-shared.crio.io";

const ANNOTATION_TRUE: &str = "true";
const ANNOTATION_DISABLE: &str = "disable";
const ANNOTATION_ENABLE: &str = "enable";

/// Resume latency that allows every C-state
const LATENCY_ALL_STATES: &str = "0";
/// Resume latency that keeps the CPU in C0
const LATENCY_C0_ONLY: &str = "n/a";

/// What an annotation asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// The annotation is missing (or carries a value that requests nothing)
    Absent,
    /// Turn the feature off; `deprecated` marks the legacy `"true"` value
    Disable { deprecated: bool },
    /// The annotation value, passed through verbatim
    Value(String),
}

impl Directive {
    pub fn is_present(&self) -> bool {
        !matches!(self, Directive::Absent)
    }

    pub fn disables(&self) -> bool {
        matches!(self, Directive::Disable { .. })
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Directive::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Directives requested for one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationPolicy {
    pub cpu_load_balancing: Directive,
    pub cpu_quota: Directive,
    pub irq_load_balancing: Directive,
    pub c_states: Directive,
    pub freq_governor: Directive,
    pub shared_cpus: bool,
}

impl AnnotationPolicy {
    pub fn from_annotations(annotations: &HashMap<String, String>, container_name: &str) -> Self {
        Self {
            cpu_load_balancing: toggle(annotations, CPU_LOAD_BALANCING_ANNOTATION),
            cpu_quota: toggle(annotations, CPU_QUOTA_ANNOTATION),
            irq_load_balancing: toggle(annotations, IRQ_LOAD_BALANCING_ANNOTATION),
            c_states: verbatim(annotations, CPU_C_STATES_ANNOTATION),
            freq_governor: verbatim(annotations, CPU_FREQ_GOVERNOR_ANNOTATION),
            shared_cpus: requested_shared_cpus(annotations, container_name),
        }
    }
}

fn toggle(annotations: &HashMap<String, String>, key: &str) -> Directive {
    match annotations.get(key).map(String::as_str) {
        Some(ANNOTATION_TRUE) => {
            warn!(
                annotation = key,
                "the annotation value \"true\" is deprecated, use \"disable\" instead"
            );
            Directive::Disable { deprecated: true }
        }
        Some(ANNOTATION_DISABLE) => Directive::Disable { deprecated: false },
        _ => Directive::Absent,
    }
}

fn verbatim(annotations: &HashMap<String, String>, key: &str) -> Directive {
    match annotations.get(key) {
        Some(value) => Directive::Value(value.clone()),
        None => Directive::Absent,
    }
}

/// True when `cpu-shared.crio.io/<container-name>` is `enable`
pub fn requested_shared_cpus(annotations: &HashMap<String, String>, container_name: &str) -> bool {
    let key = format!("{}/{}", CPU_SHARED_ANNOTATION, container_name);
    annotations.get(&key).map(String::as_str) == Some(ANNOTATION_ENABLE)
}

/// C-state request carried by the c-states annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CStates {
    Enable,
    Disable,
}

impl CStates {
    pub fn parse(value: &str) -> Result<Self, HookError> {
        match value {
            ANNOTATION_ENABLE => Ok(CStates::Enable),
            ANNOTATION_DISABLE => Ok(CStates::Disable),
            other => Err(HookError::InvalidAnnotation {
                key: CPU_C_STATES_ANNOTATION.to_string(),
                value: other.to_string(),
            }),
        }
    }

    /// Value written to `pm_qos_resume_latency_us`
    pub fn resume_latency(self) -> &'static str {
        match self {
            CStates::Enable => LATENCY_ALL_STATES,
            CStates::Disable => LATENCY_C0_ONLY,
        }
    }
}

/// Whether the runtime should leave the CFS quota of a new container unset
///
/// Combines the eligibility gate with the quota annotation; used when the
/// container cgroup is created, before any hook runs.
pub fn should_cpu_quota_be_disabled(
    container_id: &str,
    spec: &ContainerSpec,
    sandbox: &dyn Sandbox,
) -> bool {
    if !should_run_hooks(container_id, spec, sandbox) {
        return false;
    }
    toggle(sandbox.annotations(), CPU_QUOTA_ANNOTATION).disables()
}
