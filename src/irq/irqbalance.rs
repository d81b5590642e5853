//! irqbalance configuration
//!
//! irqbalance reads the CPUs it must never route interrupts to from
//! `IRQBALANCE_BANNED_CPUS` in its environment file:
//!
//! ```text
//! IRQBALANCE_BANNED_CPUS="f0"
//! ```
//!
//! The hooks rewrite that line in place. After a reboot the kernel resets the
//! affinity mask to all CPUs while the file still bans the CPUs of containers
//! that no longer exist; [`restore_irqbalance_config`] puts back the banned
//! mask captured at first boot.

use std::path::Path;

use tracing::{info, warn};

use super::mask::IrqAffinityMask;
use crate::error::HookError;
use crate::metrics::IRQBALANCE_RESTART_FAILURES;
use crate::node::NodeEnv;

/// Environment variable (and config key) holding the banned CPU mask
pub const IRQBALANCE_BANNED_CPUS: &str = "IRQBALANCE_BANNED_CPUS";
/// Service and binary name
pub const IRQBALANCE_NAME: &str = "irqbalance";

fn banned_cpus_line(banned: &str) -> String {
    format!("{}=\"{}\"", IRQBALANCE_BANNED_CPUS, banned)
}

fn is_banned_cpus_line(line: &str) -> bool {
    line.strip_prefix(IRQBALANCE_BANNED_CPUS)
        .map(|rest| rest.starts_with('='))
        .unwrap_or(false)
}

/// Rewrite the banned CPU mask in `content`, appending it when missing
pub fn set_banned_cpus(content: &str, banned: &str) -> String {
    let mut found = false;
    let mut lines: Vec<String> = content
        .split('\n')
        .map(|line| {
            if is_banned_cpus_line(line) {
                found = true;
                banned_cpus_line(banned)
            } else {
                line.to_string()
            }
        })
        .collect();

    if !found {
        // keep a trailing newline in front of the appended setting
        if lines.last().map(|l| l.is_empty()).unwrap_or(false) {
            lines.pop();
        }
        lines.push(banned_cpus_line(banned));
        lines.push(String::new());
    }
    lines.join("\n")
}

/// Banned CPU mask configured in `content`; empty when not set
pub fn banned_cpus(content: &str) -> String {
    content
        .lines()
        .filter(|line| is_banned_cpus_line(line))
        .find_map(|line| line.split_once('='))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .unwrap_or_default()
}

/// Update the banned CPU mask in the irqbalance config file
pub fn update_irqbalance_config(env: &NodeEnv, path: &Path, banned: &str) -> Result<(), HookError> {
    let content = env.fs().read(path).map_err(|e| HookError::io(path, e))?;
    let updated = set_banned_cpus(&content, banned);
    env.fs()
        .write(path, &updated)
        .map_err(|e| HookError::io(path, e))
}

/// Banned CPU mask currently configured in the irqbalance config file
pub fn retrieve_irq_banned_cpus(env: &NodeEnv, path: &Path) -> Result<String, HookError> {
    let content = env.fs().read(path).map_err(|e| HookError::io(path, e))?;
    Ok(banned_cpus(&content))
}

/// Restart the irqbalance service; failures are only logged
pub fn restart_irqbalance(env: &NodeEnv) {
    if let Err(e) = env.services.restart(IRQBALANCE_NAME) {
        IRQBALANCE_RESTART_FAILURES.inc();
        warn!(error = %e, "irqbalance service restart failed");
    }
}

/// Node-boot reconciliation of the irqbalance banned CPU list
///
/// Only acts right after a reboot, recognized by the affinity mask being back
/// at the kernel default. The first time it runs it records the configured
/// banned mask as the original; later boots restore that original.
pub fn restore_irqbalance_config(env: &NodeEnv) -> Result<(), HookError> {
    let paths = &env.paths;
    let content = env
        .fs()
        .read(&paths.irq_smp_affinity_file)
        .map_err(|e| HookError::io(&paths.irq_smp_affinity_file, e))?;
    let mask = IrqAffinityMask::parse(&content)?;
    if !mask.is_all_set() {
        info!("restore irqbalance config: not a system reboot, ignoring");
        return Ok(());
    }

    let banned = match retrieve_irq_banned_cpus(env, &paths.irqbalance_config_file) {
        Ok(banned) => banned,
        Err(e) => {
            info!(error = %e, "restore irqbalance config: no current CPU ban list, ignoring");
            return Ok(());
        }
    };

    let backup = &paths.irqbalance_banned_cpus_file;
    if !env.fs().exists(backup) {
        info!(path = %backup.display(), "creating banned CPU list backup");
        env.fs()
            .write(backup, &banned)
            .map_err(|e| HookError::io(backup, e))?;
        return Ok(());
    }

    let original = env
        .fs()
        .read(backup)
        .map_err(|e| HookError::io(backup, e))?
        .trim()
        .to_string();
    if banned == original {
        info!("restore irqbalance config: nothing to do");
        return Ok(());
    }

    info!(
        path = %paths.irqbalance_config_file.display(),
        banned = %original,
        "restoring irqbalance banned CPU list"
    );
    update_irqbalance_config(env, &paths.irqbalance_config_file, &original)?;
    if env.services.is_enabled(IRQBALANCE_NAME) {
        restart_irqbalance(env);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_banned_cpus_in_place() {
        let content = "# irqbalance\nIRQBALANCE_ONESHOT=\nIRQBALANCE_BANNED_CPUS=\"00\"\nIRQBALANCE_ARGS=\n";
        let updated = set_banned_cpus(content, "f0");
        assert_eq!(
            updated,
            "# irqbalance\nIRQBALANCE_ONESHOT=\nIRQBALANCE_BANNED_CPUS=\"f0\"\nIRQBALANCE_ARGS=\n"
        );
    }

    #[test]
    fn test_set_banned_cpus_appends() {
        assert_eq!(
            set_banned_cpus("IRQBALANCE_ARGS=\n", "f0"),
            "IRQBALANCE_ARGS=\nIRQBALANCE_BANNED_CPUS=\"f0\"\n"
        );
        assert_eq!(set_banned_cpus("", "0f"), "IRQBALANCE_BANNED_CPUS=\"0f\"\n");
    }

    #[test]
    fn test_similar_keys_are_left_alone() {
        let content = "IRQBALANCE_BANNED_CPUS_EXTRA=1\n";
        let updated = set_banned_cpus(content, "f0");
        assert!(updated.starts_with("IRQBALANCE_BANNED_CPUS_EXTRA=1\n"));
        assert!(updated.contains("IRQBALANCE_BANNED_CPUS=\"f0\""));
    }

    #[test]
    fn test_banned_cpus_reads_back() {
        assert_eq!(banned_cpus("A=1\nIRQBALANCE_BANNED_CPUS=\"f0\"\n"), "f0");
        assert_eq!(banned_cpus("IRQBALANCE_BANNED_CPUS=0f"), "0f");
        assert_eq!(banned_cpus("A=1\n"), "");
    }
}
