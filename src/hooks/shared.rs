//! Shared CPUs added on top of the exclusive allocation
//!
//! A container asking for shared CPUs runs on `isolated ∪ shared` with a CFS
//! quota covering all of them. When its isolated CPUs must also leave load
//! balancing (v2), they move into a nested isolated partition:
//!
//! ```text
//! crio-abc.scope               cpuset.cpus = isolated ∪ shared, partition = member
//! crio-abc.scope/cgroup-child  cpuset.cpus = cpuset.cpus.exclusive = isolated, partition = isolated
//! ```

use tracing::{debug, info};

use super::load_balancing::add_or_remove_cpuset_from_file;
use crate::annotations::AnnotationPolicy;
use crate::cgroups::{
    CgroupHierarchy, CGROUP_SUBTREE_CONTROL, CPUSET_CPUS, CPUSET_CPUS_EXCLUSIVE,
    CPUSET_CPUS_PARTITION,
};
use crate::container::{Container, Sandbox};
use crate::cpuset::CpuSet;
use crate::error::HookError;
use crate::node::{write_cgroup_file, NodeEnv};

/// Isolated CPU list exposed to the workload
pub const ISOLATED_CPUS_ENV: &str = "OPENSHIFT_ISOLATED_CPUS";
/// Shared CPU list exposed to the workload
pub const SHARED_CPUS_ENV: &str = "OPENSHIFT_SHARED_CPUS";

/// Kernel default CFS period in microseconds
pub const DEFAULT_CFS_PERIOD: u64 = 100_000;

const CGROUP_CHILD: &str = "cgroup-child";
const MILLI_CPU_PER_CPU: u64 = 1000;

/// CFS quota granting one full CPU per period to every CPU of `cpus`
pub fn calculate_cfs_quota(cpus: &CpuSet, period: u64) -> u64 {
    let milli_cpus = cpus.len() as u64 * MILLI_CPU_PER_CPU;
    milli_cpus * period / MILLI_CPU_PER_CPU
}

/// Extend the container (and pod) cpuset with the shared CPUs
///
/// When the pod also disables load balancing on v2, the isolated CPUs are
/// carved into their own partition below the container cgroup.
pub fn set_shared_cpus(
    env: &NodeEnv,
    container: &mut dyn Container,
    sandbox: &dyn Sandbox,
    shared: &CpuSet,
) -> Result<(), HookError> {
    let mut spec = container.spec();
    let isolated = spec.cpus().ok_or_else(|| HookError::MissingCpus {
        container: container.id().to_string(),
    })?;
    let isolated = CpuSet::parse(isolated)?;
    info!(
        container = container.name(),
        cpus = %isolated,
        "container cpus before applying shared cpus"
    );

    let all_cpus = isolated.union(shared);
    let period = spec
        .cpu()
        .and_then(|cpu| cpu.period)
        .unwrap_or(DEFAULT_CFS_PERIOD);
    let quota = calculate_cfs_quota(&all_cpus, period).to_string();
    let quota_file = env.cgroup_version.quota_file();

    let hierarchy = CgroupHierarchy::from_pid(env, container.pid()?)?;

    let pod_cpuset = hierarchy.absolute_pod_path("cpuset")?;
    let pod_cpu = hierarchy.absolute_pod_path("cpuacct")?;
    add_or_remove_cpuset_from_file(env, &pod_cpuset, CPUSET_CPUS, shared, true)?;
    write_cgroup_file(env.fs(), &pod_cpu, quota_file, &quota)?;

    let container_cpuset = hierarchy.absolute_container_path("cpuset")?;
    let container_cpu = hierarchy.absolute_container_path("cpuacct")?;
    add_or_remove_cpuset_from_file(env, &container_cpuset, CPUSET_CPUS, shared, true)?;
    write_cgroup_file(env.fs(), &container_cpu, quota_file, &quota)?;
    info!(
        container = container.name(),
        cpus = %all_cpus,
        quota = %quota,
        "container cpus after applying shared cpus"
    );

    let policy = AnnotationPolicy::from_annotations(sandbox.annotations(), container.name());
    if policy.cpu_load_balancing.disables() && env.is_cgroup_v2() {
        let fs = env.fs();
        write_cgroup_file(fs, &container_cpuset, CGROUP_SUBTREE_CONTROL, "+cpu +cpuset")?;
        write_cgroup_file(fs, &container_cpuset, CPUSET_CPUS_PARTITION, "member")?;

        let child = container_cpuset.join(CGROUP_CHILD);
        if fs.exists(&child) {
            debug!(cgroup = %child.display(), "reusing existing child cgroup");
        } else {
            fs.create_dir(&child).map_err(|e| HookError::io(&child, e))?;
        }
        let isolated_list = isolated.to_string();
        write_cgroup_file(fs, &child, CPUSET_CPUS, &isolated_list)?;
        write_cgroup_file(fs, &child, CPUSET_CPUS_EXCLUSIVE, &isolated_list)?;
        write_cgroup_file(fs, &child, CPUSET_CPUS_PARTITION, "isolated")?;
    }

    spec.push_env([
        format!("{}={}", ISOLATED_CPUS_ENV, isolated),
        format!("{}={}", SHARED_CPUS_ENV, shared),
    ]);
    container.set_spec(spec);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::CPU_LOAD_BALANCING_ANNOTATION;
    use crate::cgroups::CgroupVersion;
    use crate::testutil::{container, sandbox, Node};

    const POD: &str = "cgroup/kubepods.slice/kubepods-pod1.slice";
    const CTR: &str = "cgroup/kubepods.slice/kubepods-pod1.slice/crio-abc.scope";

    fn v2_node() -> Node {
        let node = Node::new(CgroupVersion::V2);
        node.set_proc_cgroup(4242, "0::/kubepods.slice/kubepods-pod1.slice/crio-abc.scope\n");
        node.write(&format!("{}/cpuset.cpus", POD), "2-3\n");
        node.write(&format!("{}/cpu.max", POD), "max 100000\n");
        node.write(&format!("{}/cpuset.cpus", CTR), "2-3\n");
        node.write(&format!("{}/cpu.max", CTR), "max 100000\n");
        node
    }

    #[test]
    fn test_quota_formula() {
        let cpus: CpuSet = "0-3".parse().unwrap();
        assert_eq!(calculate_cfs_quota(&cpus, 100_000), 400_000);
        assert_eq!(calculate_cfs_quota(&CpuSet::new(), 100_000), 0);
        assert_eq!(calculate_cfs_quota(&"5".parse().unwrap(), 50_000), 50_000);
    }

    #[test]
    fn test_shared_cpus_extend_pod_and_container() {
        let node = v2_node();
        let mut c = container("abc", "2-3", 2048);
        let shared: CpuSet = "0-1".parse().unwrap();

        let s = sandbox("kubepods-pod1.slice", &[]);

        set_shared_cpus(&node.env, &mut c, &s, &shared).unwrap();

        assert_eq!(node.read(&format!("{}/cpuset.cpus", POD)), "0-3");
        assert_eq!(node.read(&format!("{}/cpuset.cpus", CTR)), "0-3");
        assert_eq!(node.read(&format!("{}/cpu.max", POD)), "400000");
        assert_eq!(node.read(&format!("{}/cpu.max", CTR)), "400000");
        assert!(!node.path(&format!("{}/cgroup-child", CTR)).exists());

        let env = c.spec.process.unwrap().env;
        assert!(env.contains(&"OPENSHIFT_ISOLATED_CPUS=2-3".to_string()));
        assert!(env.contains(&"OPENSHIFT_SHARED_CPUS=0-1".to_string()));
    }

    #[test]
    fn test_isolated_cpus_move_to_child_partition() {
        let node = v2_node();
        let mut c = container("abc", "2-3", 2048);
        let shared: CpuSet = "0-1".parse().unwrap();
        let s = sandbox(
            "kubepods-pod1.slice",
            &[(CPU_LOAD_BALANCING_ANNOTATION, "disable")],
        );

        set_shared_cpus(&node.env, &mut c, &s, &shared).unwrap();

        assert_eq!(node.read(&format!("{}/cgroup.subtree_control", CTR)), "+cpu +cpuset");
        assert_eq!(node.read(&format!("{}/cpuset.cpus.partition", CTR)), "member");
        let child = format!("{}/cgroup-child", CTR);
        assert_eq!(node.read(&format!("{}/cpuset.cpus", child)), "2-3");
        assert_eq!(node.read(&format!("{}/cpuset.cpus.exclusive", child)), "2-3");
        assert_eq!(node.read(&format!("{}/cpuset.cpus.partition", child)), "isolated");

        // a second run finds the child already there
        let mut again = container("abc", "2-3", 2048);
        set_shared_cpus(&node.env, &mut again, &s, &shared).unwrap();
    }

    #[test]
    fn test_v1_writes_cfs_quota() {
        let node = Node::new(CgroupVersion::V1);
        node.set_proc_cgroup(
            4242,
            "4:cpuset:/kubepods/pod1/crio-abc\n3:cpu,cpuacct:/kubepods/pod1/crio-abc\n",
        );
        node.write("cgroup/cpuset/kubepods/pod1/cpuset.cpus", "4");
        node.write("cgroup/cpuset/kubepods/pod1/crio-abc/cpuset.cpus", "4");
        node.write("cgroup/cpu,cpuacct/kubepods/pod1/cpu.cfs_quota_us", "-1");
        node.write("cgroup/cpu,cpuacct/kubepods/pod1/crio-abc/cpu.cfs_quota_us", "-1");
        let mut c = container("abc", "4", 1024);
        let shared: CpuSet = "0".parse().unwrap();

        let s = sandbox("/kubepods/pod1", &[(CPU_LOAD_BALANCING_ANNOTATION, "disable")]);

        // isolation in a child partition only exists on v2
        set_shared_cpus(&node.env, &mut c, &s, &shared).unwrap();

        assert_eq!(node.read("cgroup/cpuset/kubepods/pod1/crio-abc/cpuset.cpus"), "0,4");
        assert_eq!(
            node.read("cgroup/cpu,cpuacct/kubepods/pod1/crio-abc/cpu.cfs_quota_us"),
            "200000"
        );
        assert!(!node.path("cgroup/cpuset/kubepods/pod1/crio-abc/cgroup-child").exists());
    }
}
