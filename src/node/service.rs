//! Control of node-wide services (the `irqbalance` daemon)

use std::env;
use std::path::Path;
use std::process::Command;

use crate::error::HookError;

/// Process and service control used by the IRQ steps
pub trait ServiceManager: Send + Sync {
    /// Whether `name` is enabled as a managed service
    fn is_enabled(&self, name: &str) -> bool;
    fn restart(&self, name: &str) -> Result<(), HookError>;
    /// Whether the `name` binary is on `PATH`
    fn binary_available(&self, name: &str) -> bool;
    /// Run `name --oneshot` with extra environment variables
    fn run_oneshot(&self, name: &str, env: &[(&str, &str)]) -> Result<(), HookError>;
}

/// systemd-managed services, controlled through `systemctl`
#[derive(Debug, Default, Clone, Copy)]
pub struct Systemctl;

impl ServiceManager for Systemctl {
    fn is_enabled(&self, name: &str) -> bool {
        Command::new("systemctl")
            .args(["is-enabled", name])
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn restart(&self, name: &str) -> Result<(), HookError> {
        run(Command::new("systemctl").args(["restart", name]), "systemctl")
    }

    fn binary_available(&self, name: &str) -> bool {
        look_path(name)
    }

    fn run_oneshot(&self, name: &str, extra_env: &[(&str, &str)]) -> Result<(), HookError> {
        let mut cmd = Command::new(name);
        cmd.arg("--oneshot");
        for (key, value) in extra_env {
            cmd.env(key, value);
        }
        run(&mut cmd, name)
    }
}

fn run(cmd: &mut Command, program: &str) -> Result<(), HookError> {
    let output = cmd.output().map_err(|e| HookError::Command {
        program: program.to_string(),
        message: e.to_string(),
    })?;
    if output.status.success() {
        return Ok(());
    }
    Err(HookError::Command {
        program: program.to_string(),
        message: format!(
            "{}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    })
}

/// Search `PATH` for an executable called `name`
fn look_path(name: &str) -> bool {
    if name.contains('/') {
        return is_executable(Path::new(name));
    }
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| is_executable(&dir.join(name))))
        .unwrap_or(false)
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_look_path_absolute() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("irqbalance");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        assert!(!look_path(bin.to_str().unwrap()));

        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(look_path(bin.to_str().unwrap()));
    }

    #[test]
    fn test_look_path_missing() {
        assert!(!look_path("definitely-not-a-real-binary-name"));
    }
}
