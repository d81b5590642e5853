//! Runtime handler hooks
//!
//! The container runtime calls a hook set at three points of a container
//! lifecycle:
//!
//! ```text
//! Created ──pre_start──▶ PreStartApplied ──▶ Running ──pre_stop──▶ PreStopApplied ──post_stop──▶ Stopped
//!    └──────────────────────────post_stop (from any state)──────────────────────────────────────┘
//! ```
//!
//! - `high_performance` - the full CPU isolation hook set
//! - `default` - PostStop repair of CPU load balancing for every other handler
//! - `load_balancing`, `quota`, `power`, `shared` - the individual directives

pub mod default;
pub mod high_performance;
pub mod load_balancing;
pub mod power;
pub mod quota;
pub mod shared;

use serde::{Deserialize, Serialize};
use tracing::{error, info_span, warn, Span};
use uuid::Uuid;

pub use default::DefaultCpuLoadBalanceHooks;
pub use high_performance::HighPerformanceHooks;
pub use load_balancing::set_cpu_load_balancing;
pub use power::{set_cpu_freq_governor, set_cpu_pm_qos_resume_latency, CpuKnob};
pub use quota::set_cpu_quota;
pub use shared::{calculate_cfs_quota, set_shared_cpus};

use crate::annotations::CPU_LOAD_BALANCING_ANNOTATION;
use crate::config::HooksConfig;
use crate::container::{Container, Sandbox};
use crate::error::HookError;
use crate::metrics::record_hook;
use crate::node::NodeEnv;

/// Deprecated handler name that always selects the high-performance hooks
pub const HIGH_PERFORMANCE: &str = "high-performance";

/// Lifecycle point a hook runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    PreStart,
    PreStop,
    PostStop,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::PreStart => "pre_start",
            HookKind::PreStop => "pre_stop",
            HookKind::PostStop => "post_stop",
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a successful hook did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Applied,
    /// The container is not eligible, or nothing applies to it
    Skipped,
}

impl HookOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            HookOutcome::Applied => "applied",
            HookOutcome::Skipped => "skipped",
        }
    }
}

/// Per-invocation logging context
///
/// Carries no cancellation: a started cgroup update always runs to
/// completion or rollback.
#[derive(Debug, Clone)]
pub struct HookContext {
    trace_id: Uuid,
    hook: HookKind,
    container_id: String,
}

impl HookContext {
    pub fn new(hook: HookKind, container_id: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::now_v7(),
            hook,
            container_id: container_id.into(),
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn hook(&self) -> HookKind {
        self.hook
    }

    pub fn span(&self) -> Span {
        info_span!(
            "hook",
            trace_id = %self.trace_id,
            hook = %self.hook,
            container_id = %self.container_id
        )
    }
}

/// Hook set attached to a runtime handler
pub trait RuntimeHandlerHooks: Send + Sync {
    fn pre_start(
        &self,
        ctx: &HookContext,
        container: &mut dyn Container,
        sandbox: &dyn Sandbox,
    ) -> Result<HookOutcome, HookError>;

    fn pre_stop(
        &self,
        ctx: &HookContext,
        container: &mut dyn Container,
        sandbox: &dyn Sandbox,
    ) -> Result<HookOutcome, HookError>;

    fn post_stop(
        &self,
        ctx: &HookContext,
        container: &mut dyn Container,
        sandbox: &dyn Sandbox,
    ) -> Result<HookOutcome, HookError>;
}

/// Run the hook named by `ctx` inside its span and count the outcome
///
/// `state` is the lifecycle state of the container before the hook; a hook
/// that is not valid from it is rejected without touching the node. On
/// success `state` moves forward, on failure it is left as it was.
pub fn run_hook(
    hooks: &dyn RuntimeHandlerHooks,
    ctx: &HookContext,
    state: &mut HookState,
    container: &mut dyn Container,
    sandbox: &dyn Sandbox,
) -> Result<HookOutcome, HookError> {
    let span = ctx.span();
    let _enter = span.enter();

    let Some(next) = state.advance(ctx.hook()) else {
        record_hook(ctx.hook().as_str(), "rejected");
        let err = HookError::InvalidTransition {
            from: state.as_str(),
            hook: ctx.hook().as_str(),
        };
        error!(error = %err, "hook rejected");
        return Err(err);
    };

    let result = match ctx.hook() {
        HookKind::PreStart => hooks.pre_start(ctx, container, sandbox),
        HookKind::PreStop => hooks.pre_stop(ctx, container, sandbox),
        HookKind::PostStop => hooks.post_stop(ctx, container, sandbox),
    };
    match &result {
        Ok(outcome) => {
            record_hook(ctx.hook().as_str(), outcome.as_str());
            *state = next;
        }
        Err(e) => {
            record_hook(ctx.hook().as_str(), "failed");
            error!(error = %e, "hook failed");
        }
    }
    result
}

/// Pick the hook set for a runtime handler
///
/// Handlers allowed to disable CPU load balancing get the full hook set.
/// As soon as any handler is, every other handler still needs the PostStop
/// repair, since a container may have been isolated by an earlier runtime.
pub fn select_hooks(
    config: &HooksConfig,
    env: &NodeEnv,
    handler: &str,
) -> Result<Option<Box<dyn RuntimeHandlerHooks>>, HookError> {
    let deprecated = handler.contains(HIGH_PERFORMANCE);
    if deprecated {
        warn!(
            handler,
            "the {:?} runtime handler name is deprecated, allow {} in the handler instead",
            HIGH_PERFORMANCE,
            CPU_LOAD_BALANCING_ANNOTATION
        );
    }

    if deprecated || config.handler_allows(handler, CPU_LOAD_BALANCING_ANNOTATION) {
        let mut hooks = HighPerformanceHooks::new(env.clone(), config.shared_cpus()?);
        if let Some(lock_file) = &config.lock_file {
            hooks = hooks.with_lock_file(lock_file.clone());
        }
        return Ok(Some(Box::new(hooks)));
    }
    if config.any_handler_allows(CPU_LOAD_BALANCING_ANNOTATION) {
        let mut hooks = DefaultCpuLoadBalanceHooks::new(env.clone());
        if let Some(lock_file) = &config.lock_file {
            hooks = hooks.with_lock_file(lock_file.clone());
        }
        return Ok(Some(Box::new(hooks)));
    }
    Ok(None)
}

/// Lifecycle of one container as seen by the hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookState {
    #[default]
    Created,
    PreStartApplied,
    Running,
    PreStopApplied,
    Stopped,
}

impl HookState {
    /// State after running `hook`; `None` when the hook is not valid now
    ///
    /// PostStop is accepted from every state so cleanup always runs.
    pub fn advance(self, hook: HookKind) -> Option<HookState> {
        match (self, hook) {
            (HookState::Created, HookKind::PreStart) => Some(HookState::PreStartApplied),
            (HookState::PreStartApplied | HookState::Running, HookKind::PreStop) => {
                Some(HookState::PreStopApplied)
            }
            (_, HookKind::PostStop) => Some(HookState::Stopped),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HookState::Created => "created",
            HookState::PreStartApplied => "pre_start_applied",
            HookState::Running => "running",
            HookState::PreStopApplied => "pre_stop_applied",
            HookState::Stopped => "stopped",
        }
    }

    /// The container process was started after PreStart
    pub fn started(self) -> HookState {
        match self {
            HookState::PreStartApplied => HookState::Running,
            other => other,
        }
    }
}
