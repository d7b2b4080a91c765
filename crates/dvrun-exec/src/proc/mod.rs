//! Supervision of the node's device processes.
//!
//! One worker is launched per device of the resolved node. The supervisor then polls them until the
//! first failure or until all of them succeed, and tears them down in two phases: a graceful
//! terminate to each process group in reverse launch order, followed by escalation rounds with
//! doubling waits and a final forced kill.
mod sink;
mod worker;
pub use worker::{WorkerInfo, log_file};

use std::{path::PathBuf, time::Duration};

use dvrun_core::{DeviceNumbering, NodeConfig};
use dvrun_model::{ProcEnv, ResolvedNode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    env::EnvBuilder,
    error::{ExecError, ExecResult},
    signal::TerminationListener,
};
use worker::Worker;

/// Escalation rounds between the graceful terminate and the forced kill.
pub const ESCALATION_ROUNDS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Launching,
    Running,
    TerminatingGraceful,
    TerminatingForced,
    Terminated,
}

/// Job-wide inputs shared by every worker of one node.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub job_id: String,
    pub numbering: DeviceNumbering,
    /// Parent of the per-device working directories.
    pub workspace_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Environment every worker starts from.
    pub ambient: ProcEnv,
    /// Echo worker output to this process's stdout/stderr besides the log file.
    pub echo_output: bool,
}

impl LaunchContext {
    pub fn from_config(cfg: &NodeConfig, numbering: DeviceNumbering, ambient: ProcEnv) -> Self {
        Self {
            job_id: cfg.job_id.clone(),
            numbering,
            workspace_dir: cfg.workspace_dir.clone(),
            log_dir: cfg.log_dir.clone(),
            ambient,
            echo_output: true,
        }
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo_output = echo;
        self
    }
}

/// Outcome of [`Supervisor::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Ranks sent the graceful terminate, in signal order.
    pub signalled: Vec<String>,
    /// Ranks that exited on their own or after the graceful terminate.
    pub exited_gracefully: Vec<String>,
    /// Ranks that ignored the escalation window and were killed.
    pub force_killed: Vec<String>,
    /// Waits performed between escalation rounds.
    pub waits: Vec<Duration>,
}

impl ShutdownReport {
    /// Some worker ignored the graceful terminate.
    pub fn timed_out(&self) -> bool {
        !self.force_killed.is_empty()
    }
}

/// Options of [`Supervisor::wait`].
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Shut the remaining workers down once monitoring ends.
    pub destroy_when_finished: bool,
    /// Turn a non-zero exit into [`ExecError::WorkerFailed`].
    pub raise_on_failure: bool,
    pub poll_interval: Duration,
    pub base_period: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            destroy_when_finished: true,
            raise_on_failure: true,
            poll_interval: Duration::from_secs(1),
            base_period: Duration::from_secs(1),
        }
    }
}

/// Owns the workers of one run.
pub struct Supervisor {
    ctx: LaunchContext,
    env: EnvBuilder,
    workers: Vec<Worker>,
    state: SupervisorState,
    /// First non-zero exit seen by the monitor, with the failing worker.
    failure: Option<(i32, WorkerInfo)>,
}

impl Supervisor {
    pub fn new(ctx: LaunchContext) -> Self {
        let env = EnvBuilder::new(
            ctx.ambient.clone(),
            ctx.job_id.clone(),
            ctx.numbering,
            ctx.log_dir.clone(),
        );
        Self {
            ctx,
            env,
            workers: Vec::new(),
            state: SupervisorState::Idle,
            failure: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Workers still under supervision, in launch order.
    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.workers.iter().map(|w| w.info.clone()).collect()
    }

    /// Start one worker per device of `node`, in device order.
    ///
    /// Must be called inside a tokio runtime. A worker that fails to start aborts the launch;
    /// workers started before it stay supervised so the caller can shut them down.
    pub fn launch(
        &mut self,
        node: &ResolvedNode,
        rank_size: usize,
        command: &[String],
    ) -> ExecResult<()> {
        if command.is_empty() {
            return Err(ExecError::MissingProgram);
        }
        self.state = SupervisorState::Launching;

        let devices = &node.current_instance.devices;
        info!(
            target: "dvrun.exec.supervisor",
            server = %node.current_instance.server_id,
            workers = devices.len(),
            rank_size,
            "launching workers"
        );
        for (index, device) in devices.iter().enumerate() {
            let env = self.env.build(index, device, rank_size)?;
            let worker = Worker::spawn(&self.ctx, env, command).inspect_err(|e| {
                error!(target: "dvrun.exec.supervisor", rank = %device.rank(), error = %e, "launch failed");
            })?;
            self.workers.push(worker);
        }

        self.state = SupervisorState::Running;
        Ok(())
    }

    /// Poll the workers every `poll` until one fails, all succeed, or `cancel` fires.
    ///
    /// Returns the first non-zero exit code observed, or `0` when every worker exited cleanly or
    /// monitoring was cancelled.
    pub async fn monitor(&mut self, poll: Duration, cancel: &CancellationToken) -> ExecResult<i32> {
        loop {
            if cancel.is_cancelled() {
                info!(target: "dvrun.exec.supervisor", "monitoring cancelled");
                return Ok(0);
            }

            let mut running = 0usize;
            for worker in &mut self.workers {
                match worker.try_exit_code()? {
                    None => running += 1,
                    Some(0) => {}
                    Some(code) => {
                        error!(
                            target: "dvrun.exec.supervisor",
                            rank = %worker.info.rank_id,
                            code,
                            log = %worker.info.log_path.display(),
                            "worker failed"
                        );
                        self.failure = Some((code, worker.info.clone()));
                        return Ok(code);
                    }
                }
            }
            if running == 0 {
                info!(target: "dvrun.exec.supervisor", "all workers finished");
                return Ok(0);
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// [`Supervisor::monitor`] with SIGTERM and SIGINT handled for the duration of the call.
    pub async fn monitor_with_signals(&mut self, poll: Duration) -> ExecResult<i32> {
        let listener = TerminationListener::install()?;
        self.monitor(poll, listener.token()).await
    }

    /// Terminate every remaining worker.
    ///
    /// Safe to call repeatedly; a call with nothing left to stop returns an empty report.
    pub async fn shutdown(&mut self, base_period: Duration) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.workers.is_empty() {
            self.state = SupervisorState::Terminated;
            return report;
        }

        self.state = SupervisorState::TerminatingGraceful;
        for worker in self.workers.iter_mut().rev() {
            match worker.signal(libc::SIGTERM) {
                Ok(true) => report.signalled.push(worker.info.rank_id.clone()),
                Ok(false) => {}
                Err(e) => {
                    warn!(target: "dvrun.exec.supervisor", rank = %worker.info.rank_id, error = %e, "terminate failed")
                }
            }
        }
        self.prune(&mut report).await;

        let mut period = base_period;
        for round in 1..=ESCALATION_ROUNDS {
            if self.workers.is_empty() {
                break;
            }
            debug!(target: "dvrun.exec.supervisor", round, ?period, survivors = self.workers.len(), "waiting for workers");
            tokio::time::sleep(period).await;
            report.waits.push(period);
            self.prune(&mut report).await;
            period *= 2;
        }

        if !self.workers.is_empty() {
            self.state = SupervisorState::TerminatingForced;
            for worker in self.workers.iter_mut().rev() {
                warn!(target: "dvrun.exec.supervisor", rank = %worker.info.rank_id, pid = worker.info.pid, "force killing worker");
                if let Err(e) = worker.signal(libc::SIGKILL) {
                    warn!(target: "dvrun.exec.supervisor", rank = %worker.info.rank_id, error = %e, "kill failed");
                }
            }
            for mut worker in self.workers.drain(..).rev() {
                if let Err(e) = worker.reap().await {
                    warn!(target: "dvrun.exec.supervisor", rank = %worker.info.rank_id, error = %e, "reap failed");
                }
                worker.drain().await;
                report.force_killed.push(worker.info.rank_id.clone());
            }
        }

        self.state = SupervisorState::Terminated;
        info!(
            target: "dvrun.exec.supervisor",
            exited = report.exited_gracefully.len(),
            killed = report.force_killed.len(),
            "shutdown complete"
        );
        report
    }

    /// Monitor, optionally shut down, and map a failure to an error.
    pub async fn wait(&mut self, opts: &WaitOptions, cancel: &CancellationToken) -> ExecResult<i32> {
        let code = self.monitor(opts.poll_interval, cancel).await;
        if opts.destroy_when_finished {
            self.shutdown(opts.base_period).await;
        }
        let code = code?;
        if code != 0 && opts.raise_on_failure {
            if let Some((code, info)) = &self.failure {
                return Err(ExecError::WorkerFailed {
                    code: *code,
                    rank_id: info.rank_id.clone(),
                    log_path: info.log_path.clone(),
                });
            }
        }
        Ok(code)
    }

    /// Drop workers that have exited, recording them as graceful exits.
    ///
    /// A worker whose status cannot be read stays supervised so the forced kill still reaches it.
    async fn prune(&mut self, report: &mut ShutdownReport) {
        let mut kept = Vec::with_capacity(self.workers.len());
        for mut worker in self.workers.drain(..) {
            let status = worker.try_exit_code();
            if let Err(e) = &status {
                warn!(target: "dvrun.exec.supervisor", rank = %worker.info.rank_id, error = %e, "status check failed");
            }
            if still_supervised(&status) {
                kept.push(worker);
                continue;
            }
            worker.drain().await;
            report.exited_gracefully.push(worker.info.rank_id.clone());
        }
        self.workers = kept;
    }
}

/// Only a worker known to have exited leaves the supervised set.
fn still_supervised(status: &ExecResult<Option<i32>>) -> bool {
    !matches!(status, Ok(Some(_)))
}
