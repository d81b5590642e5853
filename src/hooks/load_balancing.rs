//! CPU load balancing for the container CPUs
//!
//! v1 turns off `cpuset.sched_load_balance` on the container cpuset. The
//! other cgroups intersecting those CPUs (at least the ancestors) must be
//! configured the same way by whoever owns them.
//!
//! v2 puts the container into a remote isolated partition. Every ancestor
//! below the root must list the CPUs in `cpuset.cpus.exclusive`, and the leaf
//! is switched to `cpuset.cpus.partition = isolated`:
//!
//! ```text
//! /sys/fs/cgroup/kubepods.slice                      exclusive += cpus
//! /sys/fs/cgroup/kubepods.slice/kubepods-pod1.slice  exclusive += cpus
//! /sys/fs/cgroup/kubepods.slice/.../crio-abc.scope   exclusive += cpus, partition = isolated
//! ```
//!
//! The ancestors are shared with sibling containers, so a half-applied walk
//! is undone before the error is returned.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::cgroups::{
    cpuset_of_container, join_cgroup, CgroupVersion, CPUSET_CPUS, CPUSET_CPUS_EXCLUSIVE,
    CPUSET_CPUS_PARTITION, CPUSET_SCHED_LOAD_BALANCE, V1_CPUSET_MOUNT,
};
use crate::container::{Container, Sandbox};
use crate::cpuset::CpuSet;
use crate::error::HookError;
use crate::metrics::CPUSET_ROLLBACKS;
use crate::node::{read_cgroup_file, write_cgroup_file, NodeEnv};

const PARTITION_ISOLATED: &str = "isolated";

/// Disable (`enable == false`) or re-enable load balancing on the container CPUs
pub fn set_cpu_load_balancing(
    env: &NodeEnv,
    container: &dyn Container,
    sandbox: &dyn Sandbox,
    enable: bool,
) -> Result<(), HookError> {
    let spec = container.spec();
    let cpus = spec.cpus().ok_or_else(|| HookError::MissingCpus {
        container: container.id().to_string(),
    })?;

    match env.cgroup_version {
        CgroupVersion::V2 => {
            let cpus = CpuSet::parse(cpus)?;
            set_cpu_load_balancing_v2(env, container, sandbox, &cpus, enable)
        }
        CgroupVersion::V1 if !enable => disable_cpu_load_balancing_v1(env, container, sandbox),
        // the cgroup goes away with the container, nothing to undo
        CgroupVersion::V1 => Ok(()),
    }
}

fn disable_cpu_load_balancing_v1(
    env: &NodeEnv,
    container: &dyn Container,
    sandbox: &dyn Sandbox,
) -> Result<(), HookError> {
    let cpuset_path = cpuset_of_container(env, container, sandbox)?;
    let dir = join_cgroup(&env.paths.cgroup_root.join(V1_CPUSET_MOUNT), &cpuset_path);
    info!(container_id = container.id(), cgroup = %dir.display(), "disabling cpuset load balancing");
    write_cgroup_file(env.fs(), &dir, CPUSET_SCHED_LOAD_BALANCE, "0")
}

/// Pre-write `cpuset.cpus.exclusive` value of one directory
struct ExclusiveRevert {
    dir: PathBuf,
    value: String,
}

fn set_cpu_load_balancing_v2(
    env: &NodeEnv,
    container: &dyn Container,
    sandbox: &dyn Sandbox,
    cpus: &CpuSet,
    enable: bool,
) -> Result<(), HookError> {
    let cpuset_path = cpuset_of_container(env, container, sandbox)?;
    let mut reverts = Vec::new();

    match walk_exclusive_v2(env, &cpuset_path, cpus, enable, &mut reverts) {
        Ok(()) => {
            info!(
                container_id = container.id(),
                cpus = %cpus,
                enable,
                "updated cpuset partition"
            );
            Ok(())
        }
        Err(e) if enable && e.is_not_found() => {
            debug!(
                container_id = container.id(),
                error = %e,
                "container cgroup already removed"
            );
            Ok(())
        }
        Err(e) => {
            revert_exclusive(env, &reverts);
            Err(e)
        }
    }
}

fn walk_exclusive_v2(
    env: &NodeEnv,
    cpuset_path: &str,
    cpus: &CpuSet,
    enable: bool,
    reverts: &mut Vec<ExclusiveRevert>,
) -> Result<(), HookError> {
    let mut current = env.paths.cgroup_root.clone();
    for component in cpuset_path.split('/').filter(|c| !c.is_empty()) {
        current.push(component);
        if !enable {
            // the kernel rejects exclusive CPUs missing from cpuset.cpus
            add_or_remove_cpuset_from_file(env, &current, CPUSET_CPUS, cpus, true)?;
        }
        let previous =
            add_or_remove_cpuset_from_file(env, &current, CPUSET_CPUS_EXCLUSIVE, cpus, !enable)?;
        reverts.push(ExclusiveRevert {
            dir: current.clone(),
            value: previous,
        });
    }

    if enable {
        return Ok(());
    }
    let leaf = join_cgroup(&env.paths.cgroup_root, cpuset_path);
    write_cgroup_file(env.fs(), &leaf, CPUSET_CPUS_PARTITION, PARTITION_ISOLATED)
}

/// Restore the recorded values, deepest directory first
fn revert_exclusive(env: &NodeEnv, reverts: &[ExclusiveRevert]) {
    if reverts.is_empty() {
        return;
    }
    CPUSET_ROLLBACKS.inc();
    for revert in reverts.iter().rev() {
        if let Err(e) = write_cgroup_file(env.fs(), &revert.dir, CPUSET_CPUS_EXCLUSIVE, &revert.value)
        {
            error!(
                cgroup = %revert.dir.display(),
                value = %revert.value,
                error = %e,
                "failed to revert cpuset.cpus.exclusive"
            );
        }
    }
}

/// Add `cpus` to (or remove them from) a cpuset list file
///
/// Returns the content found before the write.
pub fn add_or_remove_cpuset_from_file(
    env: &NodeEnv,
    dir: &Path,
    file: &str,
    cpus: &CpuSet,
    add: bool,
) -> Result<String, HookError> {
    let current = read_cgroup_file(env.fs(), dir, file)?;
    let current = current.trim().to_string();
    let existing = CpuSet::parse(&current)?;

    let target = if add {
        existing.union(cpus)
    } else {
        existing.difference(cpus)
    };
    write_cgroup_file(env.fs(), dir, file, &target.to_string())?;
    Ok(current)
}
