//! cpushield - CPU and IRQ isolation hooks for a container runtime
//!
//! Latency-sensitive containers that own whole CPUs can ask, through pod
//! annotations, for those CPUs to be kept free of scheduler load balancing,
//! device interrupts, CFS throttling, deep C-states and frequency scaling.
//! The runtime calls the hooks of this crate around each container start and
//! stop; they translate the annotations into cgroup, sysfs and procfs writes.
//!
//! # Modules
//!
//! - `hooks` - PreStart / PreStop / PostStop hook sets and the directives they apply
//! - `irq` - default IRQ affinity and irqbalance configuration
//! - `cgroups` - cgroup v1/v2 layout, drivers and resource updates
//! - `annotations` - annotation keys and the directives they request
//! - `eligibility` - which containers qualify
//! - `node` - filesystem, service and lock capabilities over node state
//! - `config`, `metrics`, `tracing`, `error` - configuration and observability
//!
//! # Quick Start
//!
//! ```ignore
//! use cpushield::hooks::{run_hook, select_hooks, HookContext, HookKind};
//!
//! let config = HooksConfig::load(Path::new("/etc/cpushield/config.json"))?;
//! let env = config.to_node_env()?;
//! if let Some(hooks) = select_hooks(&config, &env, "performance")? {
//!     let ctx = HookContext::new(HookKind::PreStart, container.id());
//!     let mut state = container.lifecycle;
//!     run_hook(hooks.as_ref(), &ctx, &mut state, &mut container, &sandbox)?;
//!     container.lifecycle = state;
//! }
//! ```

pub mod annotations;
pub mod cgroups;
pub mod config;
pub mod container;
pub mod cpuset;
pub mod eligibility;
pub mod error;
pub mod hooks;
pub mod irq;
pub mod metrics;
pub mod node;
pub mod tracing;

#[cfg(test)]
mod testutil;

// Re-export commonly used types at crate root for convenience
pub use config::HooksConfig;
pub use container::{Container, ContainerSpec, ContainerState, PodSandbox, Sandbox};
pub use cpuset::CpuSet;
pub use error::HookError;
pub use hooks::{HookContext, HookKind, HookOutcome, RuntimeHandlerHooks};
pub use node::NodeEnv;
