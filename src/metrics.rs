//! Prometheus metrics for the CPU isolation hooks
//!
//! Everything is registered in the default registry. Each hook runs in its
//! own short-lived process, so the counters only mean something once they
//! are folded into the textfile written by [`persist`]:
//!
//! ```text
//! hook process:   counters (this run) + metrics file ──▶ metrics file
//! node exporter:  reads the metrics file (textfile collector)
//! cpushield metrics: prints the metrics file
//! ```

use std::io;
use std::path::Path;

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

use crate::error::HookError;
use crate::node::NodeLock;

const HOOK_INVOCATIONS_NAME: &str = "cpushield_hook_invocations_total";
const DIRECTIVES_APPLIED_NAME: &str = "cpushield_directives_applied_total";
const CPUSET_ROLLBACKS_NAME: &str = "cpushield_cpuset_rollbacks_total";
const IRQBALANCE_RESTART_FAILURES_NAME: &str = "cpushield_irqbalance_restart_failures_total";

lazy_static! {
    /// Hook invocations by hook and outcome.
    ///
    /// Labels:
    /// - hook: "pre_start", "pre_stop" or "post_stop"
    /// - outcome: "applied", "skipped" (ineligible container), "failed" or
    ///   "rejected" (not valid in the container lifecycle state)
    pub static ref HOOK_INVOCATIONS: IntCounterVec = register_int_counter_vec!(
        HOOK_INVOCATIONS_NAME,
        "Runtime hook invocations by hook and outcome",
        &["hook", "outcome"]
    ).expect("failed to register HOOK_INVOCATIONS metric");

    /// Directives applied or reverted, by directive name.
    pub static ref DIRECTIVES_APPLIED: IntCounterVec = register_int_counter_vec!(
        DIRECTIVES_APPLIED_NAME,
        "CPU isolation directives applied or reverted",
        &["directive"]
    ).expect("failed to register DIRECTIVES_APPLIED metric");

    /// Multi-level cpuset writes that had to be rolled back.
    pub static ref CPUSET_ROLLBACKS: IntCounter = register_int_counter!(
        CPUSET_ROLLBACKS_NAME,
        "cpuset.cpus.exclusive updates rolled back after a partial failure"
    ).expect("failed to register CPUSET_ROLLBACKS metric");

    /// irqbalance restarts that failed (not fatal to the hook).
    pub static ref IRQBALANCE_RESTART_FAILURES: IntCounter = register_int_counter!(
        IRQBALANCE_RESTART_FAILURES_NAME,
        "Failed irqbalance service restarts"
    ).expect("failed to register IRQBALANCE_RESTART_FAILURES metric");
}

/// Record the outcome of one hook invocation
pub fn record_hook(hook: &str, outcome: &str) {
    HOOK_INVOCATIONS.with_label_values(&[hook, outcome]).inc();
}

/// Record one applied directive
pub fn record_directive(directive: &str) {
    DIRECTIVES_APPLIED.with_label_values(&[directive]).inc();
}

/// Render the default registry in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// One sample line of the text exposition format
#[derive(Debug, Clone, PartialEq)]
struct Sample {
    name: String,
    labels: Vec<(String, String)>,
    value: u64,
}

impl Sample {
    fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse `name{k="v",...} value` lines, skipping comments and anything unreadable
fn parse_samples(text: &str) -> Vec<Sample> {
    text.lines().filter_map(parse_sample).collect()
}

fn parse_sample(line: &str) -> Option<Sample> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (series, value) = line.rsplit_once(' ')?;
    let value = value.parse::<f64>().ok()?;
    let (name, labels) = match series.split_once('{') {
        Some((name, rest)) => (name, parse_labels(rest.strip_suffix('}')?)?),
        None => (series, Vec::new()),
    };
    Some(Sample {
        name: name.to_string(),
        labels,
        value: value as u64,
    })
}

fn parse_labels(labels: &str) -> Option<Vec<(String, String)>> {
    labels
        .split(',')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.trim().to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

/// Add previously exported totals onto the counters of this process
fn merge_samples(text: &str) {
    for sample in parse_samples(text) {
        match sample.name.as_str() {
            HOOK_INVOCATIONS_NAME => {
                if let (Some(hook), Some(outcome)) = (sample.label("hook"), sample.label("outcome")) {
                    HOOK_INVOCATIONS
                        .with_label_values(&[hook, outcome])
                        .inc_by(sample.value);
                }
            }
            DIRECTIVES_APPLIED_NAME => {
                if let Some(directive) = sample.label("directive") {
                    DIRECTIVES_APPLIED
                        .with_label_values(&[directive])
                        .inc_by(sample.value);
                }
            }
            CPUSET_ROLLBACKS_NAME => CPUSET_ROLLBACKS.inc_by(sample.value),
            IRQBALANCE_RESTART_FAILURES_NAME => IRQBALANCE_RESTART_FAILURES.inc_by(sample.value),
            _ => {}
        }
    }
}

fn read_exported(path: &Path) -> Result<String, HookError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(HookError::io(path, e)),
    }
}

/// Load the totals exported by earlier invocations into this process
pub fn load(path: &Path) -> Result<(), HookError> {
    merge_samples(&read_exported(path)?);
    Ok(())
}

/// Fold the counters of this process into the metrics file at `path`
///
/// Call at most once per process: afterwards the in-process counters hold
/// the merged totals. Concurrent invocations are serialized through a lock
/// file next to `path`; the file is replaced atomically.
pub fn persist(path: &Path) -> Result<(), HookError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HookError::io(parent, e))?;
    }
    let _lock = NodeLock::acquire(&path.with_extension("lock"))?;

    load(path)?;
    let text = gather_text().map_err(|e| HookError::Command {
        program: "prometheus".to_string(),
        message: e.to_string(),
    })?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, text).map_err(|e| HookError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| HookError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_text_output() {
        record_hook("pre_start", "skipped");
        record_directive("cpu_quota");
        CPUSET_ROLLBACKS.inc();

        let text = gather_text().unwrap();
        assert!(text.contains("cpushield_hook_invocations_total"));
        assert!(text.contains("cpushield_directives_applied_total"));
        assert!(text.contains("cpushield_cpuset_rollbacks_total"));
    }

    #[test]
    fn test_parse_samples() {
        let text = "\
# HELP cpushield_cpuset_rollbacks_total rollbacks
# TYPE cpushield_cpuset_rollbacks_total counter
cpushield_cpuset_rollbacks_total 3
cpushield_hook_invocations_total{hook=\"pre_start\",outcome=\"applied\"} 12
garbage
";
        let samples = parse_samples(text);

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].name, "cpushield_cpuset_rollbacks_total");
        assert_eq!(samples[0].value, 3);
        assert!(samples[0].labels.is_empty());
        assert_eq!(samples[1].label("hook"), Some("pre_start"));
        assert_eq!(samples[1].label("outcome"), Some("applied"));
        assert_eq!(samples[1].value, 12);
    }

    fn exported_value(text: &str, name: &str, labels: &[(&str, &str)]) -> u64 {
        parse_samples(text)
            .into_iter()
            .find(|s| s.name == name && labels.iter().all(|(k, v)| s.label(k) == Some(*v)))
            .map(|s| s.value)
            .unwrap_or(0)
    }

    #[test]
    fn test_persist_accumulates_across_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("textfile/cpushield.prom");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "cpushield_cpuset_rollbacks_total 40\n\
             cpushield_hook_invocations_total{hook=\"pre_stop\",outcome=\"rejected\"} 7\n",
        )
        .unwrap();
        let rollbacks_before = CPUSET_ROLLBACKS.get();

        persist(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(exported_value(&text, CPUSET_ROLLBACKS_NAME, &[]) >= rollbacks_before + 40);
        assert!(
            exported_value(
                &text,
                HOOK_INVOCATIONS_NAME,
                &[("hook", "pre_stop"), ("outcome", "rejected")]
            ) >= 7
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        load(&dir.path().join("missing.prom")).unwrap();
    }
}
