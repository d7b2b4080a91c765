use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use tokio::{process::Child, sync::Mutex, task::JoinHandle};
use tracing::{debug, info, trace};

use super::{
    LaunchContext,
    sink::{Echo, SharedLog, spawn_tee},
};
use crate::{
    env::WorkerEnv,
    error::{ExecError, ExecResult},
    util::{cmd_program, exit_code, signal_group},
};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Public view of one supervised worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub rank_id: String,
    pub device_id: String,
    pub pid: u32,
    pub workdir: PathBuf,
    pub log_path: PathBuf,
}

/// One device process, leader of its own process group.
pub(crate) struct Worker {
    pub(crate) info: WorkerInfo,
    child: Child,
    exit: Option<i32>,
    pumps: Vec<JoinHandle<()>>,
}

impl Worker {
    /// Start `command` for one device. Must run inside a tokio runtime.
    pub(crate) fn spawn(ctx: &LaunchContext, env: WorkerEnv, command: &[String]) -> ExecResult<Self> {
        let Some((program, args)) = command.split_first() else {
            return Err(ExecError::MissingProgram);
        };
        let spawn_err = |source: std::io::Error| ExecError::Spawn {
            rank_id: env.rank_id.clone(),
            device_id: env.device_id.clone(),
            source,
        };

        let workdir = ctx.workspace_dir.join(format!("device{}", env.device_id));
        fs::create_dir_all(&workdir).map_err(spawn_err)?;
        let log_path = log_file(&ctx.log_dir, &ctx.job_id, &env.rank_id, &env.device_id);
        fs::create_dir_all(&ctx.log_dir).map_err(spawn_err)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_path)
            .map_err(spawn_err)?;
        let log: SharedLog = Arc::new(Mutex::new(tokio::fs::File::from_std(file)));

        let mut cmd = cmd_program(program, args);
        cmd.env_clear()
            .envs(env.env.resolved())
            .current_dir(&workdir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        trace!(target: "dvrun.exec.proc", rank = %env.rank_id, program = %program, ?args, "spawn");
        let mut child = cmd.spawn().map_err(spawn_err)?;
        let Some(pid) = child.id() else {
            return Err(spawn_err(std::io::Error::other("child exited before its pid was read")));
        };

        let (out_echo, err_echo) = if ctx.echo_output {
            (Echo::Stdout, Echo::Stderr)
        } else {
            (Echo::Off, Echo::Off)
        };
        let mut pumps = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            pumps.push(spawn_tee(out, log.clone(), out_echo, env.rank_id.clone()));
        }
        if let Some(err) = child.stderr.take() {
            pumps.push(spawn_tee(err, log, err_echo, env.rank_id.clone()));
        }

        info!(
            target: "dvrun.exec.proc",
            rank = %env.rank_id,
            device = %env.device_id,
            pid,
            log = %log_path.display(),
            "worker started"
        );

        Ok(Self {
            info: WorkerInfo {
                rank_id: env.rank_id,
                device_id: env.device_id,
                pid,
                workdir,
                log_path,
            },
            child,
            exit: None,
            pumps,
        })
    }

    /// Non-blocking exit check; the code is cached once the child is reaped.
    pub(crate) fn try_exit_code(&mut self) -> ExecResult<Option<i32>> {
        if self.exit.is_none() {
            if let Some(status) = self.child.try_wait()? {
                let code = exit_code(status);
                debug!(target: "dvrun.exec.proc", rank = %self.info.rank_id, code, "worker exited");
                self.exit = Some(code);
            }
        }
        Ok(self.exit)
    }

    /// Signal the worker's process group unless the worker has already been reaped.
    ///
    /// A failed status check does not prevent the signal. Returns whether the signal was sent.
    #[cfg(unix)]
    pub(crate) fn signal(&mut self, signal: libc::c_int) -> ExecResult<bool> {
        if matches!(self.try_exit_code(), Ok(Some(_))) {
            return Ok(false);
        }
        signal_group(self.info.pid, signal)?;
        Ok(true)
    }

    /// Block until the child is reaped.
    pub(crate) async fn reap(&mut self) -> ExecResult<i32> {
        if let Some(code) = self.exit {
            return Ok(code);
        }
        let code = exit_code(self.child.wait().await?);
        self.exit = Some(code);
        Ok(code)
    }

    /// Wait for the output pumps to drain.
    ///
    /// A descendant that outlives the worker can hold the pipes open, so each pump gets
    /// [`DRAIN_TIMEOUT`] before it is abandoned.
    pub(crate) async fn drain(&mut self) {
        for mut pump in self.pumps.drain(..) {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut pump).await.is_err() {
                debug!(target: "dvrun.exec.proc", rank = %self.info.rank_id, "output still open; detaching");
                pump.abort();
            }
        }
    }
}

/// Per-device log file inside the job's log directory.
pub fn log_file(log_dir: &Path, job_id: &str, rank_id: &str, device_id: &str) -> PathBuf {
    log_dir.join(format!("{job_id}-proc-rank-{rank_id}-device-{device_id}.txt"))
}
