//! Which containers the CPU isolation hooks apply to
//!
//! Only guaranteed-QoS pods asking for whole CPUs qualify. Burstable and
//! best-effort pods are recognized by their cgroup parent; fractional CPU
//! requests by CPU shares that are not a multiple of 1024.

use tracing::info;

use crate::container::{ContainerSpec, Sandbox};

/// CPU shares granted per whole CPU
const SHARES_PER_CPU: u64 = 1024;

/// Decide whether the hooks should touch this container at all
pub fn should_run_hooks(container_id: &str, spec: &ContainerSpec, sandbox: &dyn Sandbox) -> bool {
    if is_cgroup_parent_burstable(sandbox) {
        info!(container_id, "container is in a burstable pod, skipping");
        return false;
    }
    if is_cgroup_parent_best_effort(sandbox) {
        info!(container_id, "container is in a besteffort pod, skipping");
        return false;
    }
    if !is_container_request_whole_cpu(spec) {
        info!(container_id, "container requests partial cpu(s), skipping");
        return false;
    }
    true
}

fn is_cgroup_parent_burstable(sandbox: &dyn Sandbox) -> bool {
    sandbox.cgroup_parent().contains("burstable")
}

fn is_cgroup_parent_best_effort(sandbox: &dyn Sandbox) -> bool {
    sandbox.cgroup_parent().contains("besteffort")
}

fn is_container_request_whole_cpu(spec: &ContainerSpec) -> bool {
    match spec.cpu().and_then(|cpu| cpu.shares) {
        Some(shares) => shares % SHARES_PER_CPU == 0,
        None => false,
    }
}
