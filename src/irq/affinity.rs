//! Steering IRQs away from (or back to) the CPUs of a container

use tracing::{info, warn};

use super::irqbalance::{
    restart_irqbalance, update_irqbalance_config, IRQBALANCE_BANNED_CPUS, IRQBALANCE_NAME,
};
use super::mask::update_irq_smp_affinity_mask;
use crate::container::Container;
use crate::cpuset::CpuSet;
use crate::error::HookError;
use crate::node::NodeEnv;

/// Remove (`enable == false`) or return (`enable == true`) the container
/// CPUs from the default IRQ affinity, then bring irqbalance in line.
///
/// irqbalance problems never fail the hook, except a one-shot run that was
/// started and failed.
pub fn set_irq_load_balancing(
    env: &NodeEnv,
    container: &dyn Container,
    enable: bool,
) -> Result<(), HookError> {
    let spec = container.spec();
    let cpus = spec.cpus().ok_or_else(|| HookError::MissingCpus {
        container: container.id().to_string(),
    })?;
    let cpus = CpuSet::parse(cpus)?;

    let affinity_file = &env.paths.irq_smp_affinity_file;
    let current = env
        .fs()
        .read(affinity_file)
        .map_err(|e| HookError::io(affinity_file, e))?;
    let (mask, banned) = update_irq_smp_affinity_mask(&cpus, current.trim(), enable)?;
    env.fs()
        .write(affinity_file, &mask)
        .map_err(|e| HookError::io(affinity_file, e))?;
    info!(
        container_id = container.id(),
        mask = %mask,
        banned = %banned,
        "updated default IRQ affinity"
    );

    let config_file = &env.paths.irqbalance_config_file;
    let config_exists = env.fs().exists(config_file);
    if config_exists {
        update_irqbalance_config(env, config_file, &banned)?;
    }

    if !env.services.is_enabled(IRQBALANCE_NAME) || !config_exists {
        if !env.services.binary_available(IRQBALANCE_NAME) {
            warn!("irqbalance binary not found, skipping IRQ rebalancing");
            return Ok(());
        }
        return env
            .services
            .run_oneshot(IRQBALANCE_NAME, &[(IRQBALANCE_BANNED_CPUS, &banned)]);
    }

    restart_irqbalance(env);
    Ok(())
}
