//! Hook set isolating the CPUs of latency-sensitive containers
//!
//! PreStart applies the requested directives in a fixed order and stops at
//! the first failure:
//!
//! 1. CPU load balancing off
//! 2. shared CPUs
//! 3. IRQ balancing off
//! 4. CFS quota off
//! 5. C-states
//! 6. frequency governor
//!
//! PreStop gives back what outlives the container (IRQ affinity, exclusive
//! CPUs, power knobs). Quota and cpuset changes stay: the cgroups are deleted
//! right after.

use std::path::PathBuf;

use tracing::info;

use super::default::DefaultCpuLoadBalanceHooks;
use super::load_balancing::set_cpu_load_balancing;
use super::power::{set_cpu_freq_governor, set_cpu_pm_qos_resume_latency};
use super::quota::set_cpu_quota;
use super::shared::set_shared_cpus;
use super::{HookContext, HookOutcome, RuntimeHandlerHooks};
use crate::annotations::{AnnotationPolicy, CStates};
use crate::container::{Container, Sandbox};
use crate::cpuset::CpuSet;
use crate::eligibility::should_run_hooks;
use crate::error::HookError;
use crate::irq::set_irq_load_balancing;
use crate::metrics::record_directive;
use crate::node::{NodeEnv, NodeLock};
use crate::trace_log;

const STEP_LOAD_BALANCING: &str = "set CPU load balancing";
const STEP_SHARED_CPUS: &str = "set shared CPUs";
const STEP_IRQ_LOAD_BALANCING: &str = "set IRQ load balancing";
const STEP_CPU_QUOTA: &str = "set CPU CFS quota";
const STEP_PM_QOS: &str = "set CPU PM QOS resume latency";
const STEP_GOVERNOR: &str = "set CPU scaling governor";

#[derive(Debug, Clone)]
pub struct HighPerformanceHooks {
    env: NodeEnv,
    shared_cpus: Option<CpuSet>,
    lock_file: Option<PathBuf>,
}

impl HighPerformanceHooks {
    pub fn new(env: NodeEnv, shared_cpus: Option<CpuSet>) -> Self {
        Self {
            env,
            shared_cpus,
            lock_file: None,
        }
    }

    /// Serialize every hook on this node through an exclusive lock on `path`
    pub fn with_lock_file(mut self, path: PathBuf) -> Self {
        self.lock_file = Some(path);
        self
    }

    fn lock(&self) -> Result<Option<NodeLock>, HookError> {
        NodeLock::acquire_optional(self.lock_file.as_deref())
    }
}

impl RuntimeHandlerHooks for HighPerformanceHooks {
    fn pre_start(
        &self,
        ctx: &HookContext,
        container: &mut dyn Container,
        sandbox: &dyn Sandbox,
    ) -> Result<HookOutcome, HookError> {
        trace_log!(
            info,
            ctx.trace_id(),
            container_id = container.id(),
            "run high-performance pre-start hook"
        );
        let spec = container.spec();
        if !should_run_hooks(container.id(), &spec, sandbox) {
            return Ok(HookOutcome::Skipped);
        }

        let _lock = self.lock()?;
        let env = &self.env;
        let policy = AnnotationPolicy::from_annotations(sandbox.annotations(), container.name());

        if policy.cpu_load_balancing.disables() {
            set_cpu_load_balancing(env, &*container, sandbox, false)
                .map_err(|e| HookError::step(STEP_LOAD_BALANCING, e))?;
            record_directive("cpu_load_balancing");
        }

        if policy.shared_cpus {
            let shared = self.shared_cpus.as_ref().ok_or_else(|| {
                HookError::step(
                    STEP_SHARED_CPUS,
                    HookError::Config("shared CPUs requested but no shared cpuset is configured".to_string()),
                )
            })?;
            set_shared_cpus(env, container, sandbox, shared)
                .map_err(|e| HookError::step(STEP_SHARED_CPUS, e))?;
            record_directive("shared_cpus");
        }

        if policy.irq_load_balancing.disables() {
            info!(container_id = container.id(), "disabling irq smp balancing");
            set_irq_load_balancing(env, &*container, false)
                .map_err(|e| HookError::step(STEP_IRQ_LOAD_BALANCING, e))?;
            record_directive("irq_load_balancing");
        }

        if policy.cpu_quota.disables() {
            set_cpu_quota(env, sandbox.cgroup_parent(), &*container)
                .map_err(|e| HookError::step(STEP_CPU_QUOTA, e))?;
            record_directive("cpu_quota");
        }

        if let Some(value) = policy.c_states.value() {
            info!(container_id = container.id(), value, "configuring c-states");
            let latency = CStates::parse(value)
                .map_err(|e| HookError::step(STEP_PM_QOS, e))?
                .resume_latency();
            set_cpu_pm_qos_resume_latency(env, &*container, latency)
                .map_err(|e| HookError::step(STEP_PM_QOS, e))?;
            record_directive("c_states");
        }

        if let Some(governor) = policy.freq_governor.value() {
            info!(container_id = container.id(), governor, "configuring cpu freq governor");
            set_cpu_freq_governor(env, &*container, governor)
                .map_err(|e| HookError::step(STEP_GOVERNOR, e))?;
            record_directive("freq_governor");
        }

        Ok(HookOutcome::Applied)
    }

    fn pre_stop(
        &self,
        ctx: &HookContext,
        container: &mut dyn Container,
        sandbox: &dyn Sandbox,
    ) -> Result<HookOutcome, HookError> {
        trace_log!(
            info,
            ctx.trace_id(),
            container_id = container.id(),
            "run high-performance pre-stop hook"
        );
        let spec = container.spec();
        if !should_run_hooks(container.id(), &spec, sandbox) {
            return Ok(HookOutcome::Skipped);
        }

        let _lock = self.lock()?;
        let env = &self.env;
        let policy = AnnotationPolicy::from_annotations(sandbox.annotations(), container.name());

        if policy.irq_load_balancing.disables() {
            set_irq_load_balancing(env, &*container, true)
                .map_err(|e| HookError::step(STEP_IRQ_LOAD_BALANCING, e))?;
        }

        if policy.cpu_load_balancing.disables() {
            set_cpu_load_balancing(env, &*container, sandbox, true)
                .map_err(|e| HookError::step(STEP_LOAD_BALANCING, e))?;
        }

        // only restore what PreStart may have changed
        if policy.c_states.is_present() {
            set_cpu_pm_qos_resume_latency(env, &*container, "")
                .map_err(|e| HookError::step(STEP_PM_QOS, e))?;
        }

        if policy.freq_governor.is_present() {
            set_cpu_freq_governor(env, &*container, "")
                .map_err(|e| HookError::step(STEP_GOVERNOR, e))?;
        }

        Ok(HookOutcome::Applied)
    }

    fn post_stop(
        &self,
        ctx: &HookContext,
        container: &mut dyn Container,
        sandbox: &dyn Sandbox,
    ) -> Result<HookOutcome, HookError> {
        // the repair step takes the node lock itself
        let mut repair = DefaultCpuLoadBalanceHooks::new(self.env.clone());
        if let Some(lock_file) = &self.lock_file {
            repair = repair.with_lock_file(lock_file.clone());
        }
        repair.post_stop(ctx, container, sandbox)
    }
}
