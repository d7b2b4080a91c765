//! Per-device worker environment.
//!
//! The worker inherits the ambient environment. On top of it the builder always sets the job,
//! rank and device identity. Every other derived variable is only set when the ambient
//! environment does not define it already.
mod cache;
pub use cache::{COMPILER_CACHE_ENV, CompilerCache, DEFAULT_CACHE_ROOT};

mod diag;
pub use diag::{DiagProfile, FrameworkVersion};

use std::{
    fs,
    path::{Path, PathBuf},
};

use dvrun_core::DeviceNumbering;
use dvrun_model::{Device, ProcEnv};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ExecResult;

pub const JOB_ID_ENV: &str = "JOB_ID";
pub const DEVICE_ID_ENV: &str = "DEVICE_ID";
pub const ASCEND_DEVICE_ID_ENV: &str = "ASCEND_DEVICE_ID";
pub const RANK_ID_ENV: &str = "RANK_ID";
pub const RANK_SIZE_ENV: &str = "RANK_SIZE";
pub const CONNECT_TIMEOUT_ENV: &str = "HCCL_CONNECT_TIMEOUT";
/// 30 minutes.
pub const CONNECT_TIMEOUT_SECS: &str = "1800";
pub const PROCESS_LOG_PATH_ENV: &str = "ASCEND_PROCESS_LOG_PATH";
pub const SLOG_STDOUT_ENV: &str = "SLOG_PRINT_TO_STDOUT";
pub const OPERATOR_ENV: &str = "MA_ALGORITHM_OPERATOR";

/// Environment and identity of one worker.
#[derive(Debug, Clone)]
pub struct WorkerEnv {
    pub rank_id: String,
    /// Id the worker addresses its device by (logical or physical).
    pub device_id: String,
    pub env: ProcEnv,
}

/// Derives worker environments for one job on one node.
#[derive(Debug, Clone)]
pub struct EnvBuilder {
    ambient: ProcEnv,
    job_id: String,
    numbering: DeviceNumbering,
    log_dir: PathBuf,
}

impl EnvBuilder {
    pub fn new(
        ambient: ProcEnv,
        job_id: impl Into<String>,
        numbering: DeviceNumbering,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ambient,
            job_id: job_id.into(),
            numbering,
            log_dir: log_dir.into(),
        }
    }

    /// Id a worker uses for the device at `index` of the node's device list.
    pub fn device_id(&self, index: usize, device: &Device) -> String {
        match self.numbering {
            DeviceNumbering::Logical => index.to_string(),
            DeviceNumbering::Physical => device.device_id.clone(),
        }
    }

    /// Build the environment of the worker driving `device`.
    ///
    /// Creates the worker's process-log directory and, for the `faults` profile, its collection
    /// directory.
    pub fn build(&self, index: usize, device: &Device, rank_size: usize) -> ExecResult<WorkerEnv> {
        let rank_id = device.rank().to_string();
        let device_id = self.device_id(index, device);

        let mut env = self.ambient.clone();
        env.set(JOB_ID_ENV, self.job_id.clone());
        if self.numbering == DeviceNumbering::Logical {
            env.set(ASCEND_DEVICE_ID_ENV, device_id.clone());
        }
        env.set(DEVICE_ID_ENV, device_id.clone());
        env.set(RANK_ID_ENV, rank_id.clone());
        env.set(RANK_SIZE_ENV, rank_size.to_string());

        let mut derived = Derived {
            ambient: &self.ambient,
            env: &mut env,
        };
        derived.set(CONNECT_TIMEOUT_ENV, CONNECT_TIMEOUT_SECS);
        if ide_mode(self.ambient.get(OPERATOR_ENV)) {
            derived.set(SLOG_STDOUT_ENV, "1");
        }

        let paths = DiagPaths::new(&self.log_dir, &self.job_id, &rank_id);
        let process_log = derived.set_path(PROCESS_LOG_PATH_ENV, &paths.process_log);
        fs::create_dir_all(&process_log)?;

        if let Some(profile) = DiagProfile::select(&self.ambient) {
            debug!(target: "dvrun.exec.env", rank = %rank_id, ?profile, "diagnostic profile");
            profile.apply(&mut derived, &paths, self.ambient.get(diag::ENGINE_VERSION_ENV))?;
        }

        Ok(WorkerEnv {
            rank_id,
            device_id,
            env,
        })
    }
}

/// Applies the set-if-absent policy against the ambient environment.
pub(crate) struct Derived<'a> {
    ambient: &'a ProcEnv,
    env: &'a mut ProcEnv,
}

impl Derived<'_> {
    pub(crate) fn set(&mut self, key: &str, value: &str) {
        if let Some(existing) = self.ambient.get(key) {
            info!(target: "dvrun.exec.env", key, value = existing, "keeping ambient value");
            return;
        }
        self.env.set(key, value);
    }

    /// Set a path-valued variable and return the effective path.
    pub(crate) fn set_path(&mut self, key: &str, value: &Path) -> PathBuf {
        self.set(key, &value.to_string_lossy());
        self.env
            .get(key)
            .map(PathBuf::from)
            .unwrap_or_else(|| value.to_path_buf())
    }
}

/// Diagnostic output locations of one worker under the job's log directory.
pub(crate) struct DiagPaths {
    pub process_log: PathBuf,
    pub npu_collect: PathBuf,
    /// Framework logs, crash records and operator-manager output share one directory.
    pub framework_log: PathBuf,
    pub diagnostic_data: PathBuf,
}

impl DiagPaths {
    fn new(log_dir: &Path, job_id: &str, rank_id: &str) -> Self {
        let job = log_dir.join(job_id);
        let rank = format!("rank_{rank_id}");
        Self {
            process_log: job.join("ascend").join("process_log").join(&rank),
            npu_collect: job.join("ascend").join("npu_collect").join(&rank),
            framework_log: job.join("mindspore").join("log"),
            diagnostic_data: job.join("mindspore").join("diagnostic_data"),
        }
    }
}

/// `true` when the operator descriptor names a storage location and asks for IDE mode.
fn ide_mode(operator: Option<&str>) -> bool {
    let Some(raw) = operator.filter(|s| !s.is_empty()) else {
        return false;
    };
    let Ok(info) = serde_json::from_str::<Value>(raw) else {
        return false;
    };
    let has_location = info.get("obs").and_then(|o| o.get("obs_url")).is_some();
    let ide = match info.get("ide_mode") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Null) | None => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(_) => true,
    };
    has_location && ide
}
