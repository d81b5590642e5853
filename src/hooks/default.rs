//! Hooks for handlers that cannot isolate CPUs themselves

use std::path::PathBuf;

use tracing::debug;

use super::load_balancing::set_cpu_load_balancing;
use super::{HookContext, HookOutcome, RuntimeHandlerHooks};
use crate::container::{Container, Sandbox};
use crate::error::HookError;
use crate::metrics::record_directive;
use crate::node::{NodeEnv, NodeLock};

/// Re-enables CPU load balancing after every container stops
///
/// A container may have been isolated by an earlier runtime version (or
/// another handler); its CPUs must not stay exclusive once it is gone.
#[derive(Debug, Clone)]
pub struct DefaultCpuLoadBalanceHooks {
    env: NodeEnv,
    lock_file: Option<PathBuf>,
}

impl DefaultCpuLoadBalanceHooks {
    pub fn new(env: NodeEnv) -> Self {
        Self {
            env,
            lock_file: None,
        }
    }

    /// Hold the node lock at `path` while ancestor cpusets are rewritten
    pub fn with_lock_file(mut self, path: PathBuf) -> Self {
        self.lock_file = Some(path);
        self
    }
}

impl RuntimeHandlerHooks for DefaultCpuLoadBalanceHooks {
    fn pre_start(
        &self,
        _ctx: &HookContext,
        _container: &mut dyn Container,
        _sandbox: &dyn Sandbox,
    ) -> Result<HookOutcome, HookError> {
        Ok(HookOutcome::Skipped)
    }

    fn pre_stop(
        &self,
        _ctx: &HookContext,
        _container: &mut dyn Container,
        _sandbox: &dyn Sandbox,
    ) -> Result<HookOutcome, HookError> {
        Ok(HookOutcome::Skipped)
    }

    fn post_stop(
        &self,
        _ctx: &HookContext,
        container: &mut dyn Container,
        sandbox: &dyn Sandbox,
    ) -> Result<HookOutcome, HookError> {
        // v1 cpusets go away with the container
        if !self.env.is_cgroup_v2() {
            return Ok(HookOutcome::Skipped);
        }
        if container.spec().cpus().is_none() {
            debug!(container_id = container.id(), "no cpus to re-enable load balancing on");
            return Ok(HookOutcome::Skipped);
        }

        let _lock = NodeLock::acquire_optional(self.lock_file.as_deref())?;
        set_cpu_load_balancing(&self.env, &*container, sandbox, true)
            .map_err(|e| HookError::step("set CPU load balancing", e))?;
        record_directive("cpu_load_balancing");
        Ok(HookOutcome::Applied)
    }
}
