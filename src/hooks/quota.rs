//! Lifting the CFS quota of a container and its pod

use std::path::Path;

use tracing::info;

use crate::cgroups::{CgroupDriver, CgroupManager, Resources};
use crate::container::Container;
use crate::error::HookError;
use crate::node::NodeEnv;

/// Remove the CFS bandwidth limit at pod and container level
///
/// Never reverted: the caller deletes both cgroups on teardown.
pub fn set_cpu_quota(
    env: &NodeEnv,
    pod_cgroup_parent: &str,
    container: &dyn Container,
) -> Result<(), HookError> {
    let manager = CgroupManager::new(env, CgroupDriver::for_parent(pod_cgroup_parent));
    let (container_cgroup, container_parent) =
        container_cgroup_and_parent(&manager, pod_cgroup_parent, container.id())?;
    let (pod_cgroup, pod_parent) = split_cgroup(&container_parent);

    info!(
        container_id = container.id(),
        pod_cgroup = %container_parent,
        "disabling cpu cfs quota"
    );
    let unlimited = Resources::unlimited_cpu_quota();
    manager.set(&pod_cgroup, &pod_parent, &unlimited)?;
    manager.set(&container_cgroup, &container_parent, &unlimited)
}

/// Name of the container cgroup and the path of its parent
///
/// systemd names the container scope after the container id, so the name
/// handed back to the manager is the id rather than the scope basename.
fn container_cgroup_and_parent(
    manager: &CgroupManager<'_>,
    pod_cgroup_parent: &str,
    container_id: &str,
) -> Result<(String, String), HookError> {
    let cgroup_path = manager
        .driver()
        .container_cgroup_absolute_path(pod_cgroup_parent, container_id)?;
    let (name, parent) = split_cgroup(&cgroup_path);
    if manager.driver().is_systemd() {
        return Ok((container_id.to_string(), parent));
    }
    Ok((name, parent))
}

/// Split "/a/b/c" into ("c", "/a/b")
fn split_cgroup(path: &str) -> (String, String) {
    let path = Path::new(path);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string());
    (name, parent)
}
