//! cpushield command line
//!
//! Invoked by the runtime at each lifecycle point with the container and
//! sandbox descriptors as JSON files:
//!
//! ```text
//! cpushield pre-start --handler performance --container ctr.json --sandbox pod.json
//! cpushield restore-irqbalance
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use cpushield::hooks::{run_hook, select_hooks};
use cpushield::irq::restore_irqbalance_config;
use cpushield::metrics::{self, gather_text};
use cpushield::tracing::init_tracing;
use cpushield::{
    Container, ContainerState, HookContext, HookError, HookKind, HooksConfig, PodSandbox,
};

#[derive(Parser)]
#[command(name = "cpushield")]
#[command(version)]
#[command(about = "CPU and IRQ isolation hooks for latency-sensitive containers")]
struct Cli {
    #[command(subcommand)]
    command: SubCmd,

    /// JSON config file (host defaults when omitted)
    #[arg(long, env = "CPUSHIELD_CONFIG")]
    config: Option<PathBuf>,

    /// Log one JSON object per line
    #[arg(long)]
    log_json: bool,
}

#[derive(Subcommand)]
enum SubCmd {
    /// Apply the requested isolation before the container starts
    PreStart(HookArgs),

    /// Give back node resources before the container stops
    PreStop(HookArgs),

    /// Repair CPU load balancing after the container stopped
    PostStop(HookArgs),

    /// Reconcile the irqbalance banned CPUs after a node reboot
    RestoreIrqbalance,

    /// Print the counters accumulated in the configured metrics file
    Metrics,
}

#[derive(Parser)]
struct HookArgs {
    /// Runtime handler the container runs with
    #[arg(long)]
    handler: String,

    /// Container descriptor (JSON); rewritten after each hook
    #[arg(long)]
    container: PathBuf,

    /// Pod sandbox descriptor (JSON)
    #[arg(long)]
    sandbox: PathBuf,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, HookError> {
    let content = fs::read_to_string(path).map_err(|e| HookError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| HookError::Config(format!("{}: {}", path.display(), e)))
}

fn write_json(path: &Path, container: &ContainerState) -> Result<(), HookError> {
    let content = serde_json::to_string_pretty(container)
        .map_err(|e| HookError::Config(format!("{}: {}", path.display(), e)))?;
    fs::write(path, content).map_err(|e| HookError::io(path, e))
}

fn run_lifecycle_hook(config: &HooksConfig, kind: HookKind, args: &HookArgs) -> Result<(), HookError> {
    let env = config.to_node_env()?;
    let Some(hooks) = select_hooks(config, &env, &args.handler)? else {
        info!(handler = %args.handler, "no hooks for runtime handler");
        return Ok(());
    };

    let mut container: ContainerState = read_json(&args.container)?;
    let sandbox: PodSandbox = read_json(&args.sandbox)?;
    let ctx = HookContext::new(kind, container.id());

    let mut state = container.lifecycle;
    let outcome = run_hook(hooks.as_ref(), &ctx, &mut state, &mut container, &sandbox)?;
    info!(
        hook = %kind,
        outcome = outcome.as_str(),
        state = state.as_str(),
        trace_id = %ctx.trace_id(),
        "hook finished"
    );

    // the runtime hands the same descriptor to the next hook
    container.lifecycle = state;
    write_json(&args.container, &container)
}

fn print_metrics(config: &HooksConfig) -> Result<(), HookError> {
    let path = config.metrics_file.as_deref().ok_or_else(|| {
        HookError::Config("metrics_file is not set, counters do not outlive one invocation".to_string())
    })?;
    metrics::load(path)?;
    let text = gather_text().map_err(|e| HookError::Command {
        program: "prometheus".to_string(),
        message: e.to_string(),
    })?;
    print!("{}", text);
    Ok(())
}

fn run(cli: &Cli) -> Result<(), HookError> {
    let config = match &cli.config {
        Some(path) => HooksConfig::load(path)?,
        None => HooksConfig::default(),
    };

    let result = match &cli.command {
        SubCmd::PreStart(args) => run_lifecycle_hook(&config, HookKind::PreStart, args),
        SubCmd::PreStop(args) => run_lifecycle_hook(&config, HookKind::PreStop, args),
        SubCmd::PostStop(args) => run_lifecycle_hook(&config, HookKind::PostStop, args),
        SubCmd::RestoreIrqbalance => config.to_node_env().and_then(|env| restore_irqbalance_config(&env)),
        SubCmd::Metrics => return print_metrics(&config),
    };

    // failed runs are counted too
    if let Some(path) = &config.metrics_file {
        if let Err(e) = metrics::persist(path) {
            warn!(error = %e, path = %path.display(), "failed to export metrics");
        }
    }
    result
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_json) {
        eprintln!("failed to initialize logging: {}", e);
    }

    // SAFETY: geteuid has no preconditions and cannot fail
    if unsafe { libc::geteuid() } != 0 {
        warn!("not running as root, cgroup and sysfs writes will likely fail");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "cpushield failed");
            ExitCode::FAILURE
        }
    }
}
