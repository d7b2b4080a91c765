//! `run`: launch and supervise the node's workers.
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::Context;
use clap::Args;
use tracing::{info, warn};

use dvrun_core::{NodeConfig, rank_exports, system::log_driver};
use dvrun_exec::{
    CompilerCache, LaunchContext, Supervisor,
    env::DEFAULT_CACHE_ROOT,
};
use dvrun_model::{ProcEnv, ResolvedNode};

use crate::node;

#[derive(Args)]
pub struct RunArgs {
    /// Parent of the per-device working directories.
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,
    /// Directory for worker output and diagnostics.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
    /// Only write worker output to the log files.
    #[arg(long)]
    no_echo: bool,
    /// Give the run its own compiler cache directory, removed afterwards.
    #[arg(long)]
    random_cache_dir: bool,
    /// Where the per-run compiler cache is created.
    #[arg(long, value_name = "DIR", default_value = DEFAULT_CACHE_ROOT)]
    cache_root: PathBuf,
    /// Worker command line, passed after `--`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let mut cfg = NodeConfig::from_env();
    if let Some(dir) = &args.work_dir {
        cfg.workspace_dir = dir.clone();
    }
    if let Some(dir) = &args.log_dir {
        cfg.log_dir = dir.clone();
    }
    info!(target: "dvrun.agentd", job = %cfg.job_id, command = ?args.command, "training command");

    let numbering = log_driver(&cfg.driver_version_file);
    let node = node::resolve(&cfg).await?;

    let mut ambient = ProcEnv::from_process().merged(&rank_exports(&node));
    let cache = if args.random_cache_dir {
        CompilerCache::prepare(&args.cache_root, &mut ambient)
    } else {
        None
    };

    let ctx = LaunchContext::from_config(&cfg, numbering, ambient).with_echo(!args.no_echo);
    let result = supervise(&cfg, ctx, &node, &args.command).await;
    if let Some(cache) = cache {
        cache.remove().await;
    }
    result
}

async fn supervise(
    cfg: &NodeConfig,
    ctx: LaunchContext,
    node: &ResolvedNode,
    command: &[String],
) -> anyhow::Result<i32> {
    let mut supervisor = Supervisor::new(ctx);

    if let Err(e) = supervisor.launch(node, node.total_device_count, command) {
        let report = supervisor.shutdown(cfg.shutdown_base_period).await;
        info!(
            target: "dvrun.agentd",
            stopped = report.exited_gracefully.len() + report.force_killed.len(),
            "stopped workers started before the failure"
        );
        return Err(e).context("launching workers");
    }

    let monitored = supervisor.monitor_with_signals(cfg.poll_interval).await;
    let report = supervisor.shutdown(cfg.shutdown_base_period).await;
    if report.timed_out() {
        warn!(target: "dvrun.agentd", ranks = ?report.force_killed, "workers ignored the terminate signal");
    }
    run_pre_stop(&cfg.pre_stop_script).await;

    let code = monitored.context("monitoring workers")?;
    info!(target: "dvrun.agentd", code, "job finished");
    Ok(code)
}

/// Run the driver's pre-stop hook when it is installed.
async fn run_pre_stop(script: &Path) {
    if !script.is_file() {
        return;
    }
    let status = tokio::process::Command::new(script)
        .stdin(Stdio::null())
        .status()
        .await;
    match status {
        Ok(s) if s.success() => info!(target: "dvrun.agentd", script = %script.display(), "pre-stop hook done"),
        Ok(s) => warn!(target: "dvrun.agentd", script = %script.display(), status = %s, "pre-stop hook failed"),
        Err(e) => warn!(target: "dvrun.agentd", script = %script.display(), error = %e, "pre-stop hook did not start"),
    }
}
