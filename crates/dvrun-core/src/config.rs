//! Node-level configuration derived from the orchestrator's environment.
//!
//! Everything is read once from an environment snapshot, so callers (and tests) can hand in any
//! lookup function instead of touching the process environment.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use dvrun_model::Generation;

use crate::system::DRIVER_VERSION_FILE;

/// Generation-1 descriptor written by the notebook platform, used as is.
pub const RANK_TABLE_FILE_V1_ENV: &str = "RANK_TABLE_FILE_V_1_0";
/// Directory holding the orchestrator's descriptor; also re-exported to workers.
pub const RANK_TABLE_FILE_ENV: &str = "RANK_TABLE_FILE";
pub const DESCRIPTOR_FILE_NAME: &str = "jobstart_hccl.json";
pub const DEFAULT_DESCRIPTOR_PATH: &str = "/user/config/jobstart_hccl.json";

pub const MA_HOME_ENV: &str = "MA_HOME";
pub const MA_MOUNT_PATH_ENV: &str = "MA_MOUNT_PATH";
pub const DEFAULT_HOME: &str = "/home/ma-user";

pub const POD_NAME_ENV: &str = "BATCH_TASK_CURRENT_INSTANCE";
pub const INSTANCE_NAME_ENV: &str = "MA_CURRENT_INSTANCE_NAME";
pub const HOST_IP_ENV: &str = "MA_CURRENT_HOST_IP";

pub const BATCH_JOB_ID_ENV: &str = "BATCH_JOB_ID";
pub const VJ_NAME_ENV: &str = "MA_VJ_NAME";

pub const FMK_WORKSPACE_ENV: &str = "FMK_WORKSPACE";
pub const BATCH_LOG_PATH_ENV: &str = "BATCH_TASK_LOG_PATH";
pub const DEFAULT_LOG_DIR: &str = "/tmp/log/";

pub const READY_TIMEOUT_ENV: &str = "DVRUN_READY_TIMEOUT_SECS";

pub const PRE_STOP_SCRIPT: &str = "/usr/local/Ascend/driver/tools/docker_stop_post_sys.sh";

/// Identity hints supplied by the orchestration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeHints {
    /// Matched against generation-0 pod names.
    pub pod_name: Option<String>,
    /// Matched against generation-1 server ids when several servers are listed.
    pub host_ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Descriptor to wait for and read.
    pub descriptor_path: PathBuf,
    /// Generation the environment announced, if it announced one.
    pub expected_generation: Option<Generation>,
    /// Where the normalized generation-1 descriptor is written.
    pub canonical_dir: PathBuf,
    pub hints: NodeHints,
    pub job_id: String,
    /// Parent of the per-device working directories.
    pub workspace_dir: PathBuf,
    /// Parent of worker output files and diagnostic directories.
    pub log_dir: PathBuf,
    pub driver_version_file: PathBuf,
    pub pre_stop_script: PathBuf,
    /// Interval between descriptor readiness checks.
    pub poll_interval: Duration,
    /// `None` waits for the descriptor forever.
    pub ready_timeout: Option<Duration>,
    /// First escalation wait during shutdown; doubled every round.
    pub shutdown_base_period: Duration,
}

impl NodeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let (descriptor_path, expected_generation) = match get(RANK_TABLE_FILE_V1_ENV) {
            Some(path) => (PathBuf::from(path), Some(Generation::V1)),
            None => {
                let path = match get(RANK_TABLE_FILE_ENV) {
                    Some(dir) => Path::new(dir.trim_end_matches('/')).join(DESCRIPTOR_FILE_NAME),
                    None => PathBuf::from(DEFAULT_DESCRIPTOR_PATH),
                };
                (path, Some(Generation::V0))
            }
        };

        let mount = get(MA_MOUNT_PATH_ENV).map(PathBuf::from);

        let canonical_parent = get(MA_HOME_ENV)
            .map(PathBuf::from)
            .or_else(|| mount.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME));

        let workspace_dir = match (&mount, get(FMK_WORKSPACE_ENV)) {
            (Some(mount), _) => mount.join("workspace"),
            (None, Some(ws)) => PathBuf::from(ws),
            (None, None) => Path::new(DEFAULT_HOME).join("workspace"),
        };

        let log_dir = get(BATCH_LOG_PATH_ENV)
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .or_else(|| mount.as_ref().map(|m| m.join("log")).filter(|p| p.exists()))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));

        let ready_timeout = get(READY_TIMEOUT_ENV)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        Self {
            descriptor_path,
            expected_generation,
            canonical_dir: canonical_parent.join("rank_table"),
            hints: NodeHints {
                pod_name: get(POD_NAME_ENV).or_else(|| get(INSTANCE_NAME_ENV)),
                host_ip: get(HOST_IP_ENV),
            },
            job_id: job_id(&get),
            workspace_dir,
            log_dir,
            driver_version_file: PathBuf::from(DRIVER_VERSION_FILE),
            pre_stop_script: PathBuf::from(PRE_STOP_SCRIPT),
            poll_interval: Duration::from_secs(1),
            ready_timeout,
            shutdown_base_period: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

fn job_id(get: &impl Fn(&str) -> Option<String>) -> String {
    if let Some(id) = get(BATCH_JOB_ID_ENV) {
        return id;
    }
    if let Some(name) = get(VJ_NAME_ENV) {
        return name.replacen("ma-job", "modelarts-job", 1);
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::testutil::TempDir;

    fn config(pairs: &[(&str, &str)]) -> NodeConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = config(&[]);
        assert_eq!(cfg.descriptor_path, PathBuf::from(DEFAULT_DESCRIPTOR_PATH));
        assert_eq!(cfg.expected_generation, Some(Generation::V0));
        assert_eq!(cfg.canonical_dir, PathBuf::from("/home/ma-user/rank_table"));
        assert_eq!(cfg.workspace_dir, PathBuf::from("/home/ma-user/workspace"));
        assert_eq!(cfg.log_dir, PathBuf::from(DEFAULT_LOG_DIR));
        assert_eq!(cfg.hints, NodeHints::default());
        assert!(cfg.ready_timeout.is_none());
        assert!(!cfg.job_id.is_empty());
    }

    #[test]
    fn generation_one_path_wins() {
        let cfg = config(&[
            (RANK_TABLE_FILE_V1_ENV, "/data/v1.json"),
            (RANK_TABLE_FILE_ENV, "/user/config"),
        ]);
        assert_eq!(cfg.descriptor_path, PathBuf::from("/data/v1.json"));
        assert_eq!(cfg.expected_generation, Some(Generation::V1));
    }

    #[test]
    fn rank_table_dir_gets_file_name() {
        let cfg = config(&[(RANK_TABLE_FILE_ENV, "/opt/config/")]);
        assert_eq!(cfg.descriptor_path, PathBuf::from("/opt/config/jobstart_hccl.json"));
    }

    #[test]
    fn home_beats_mount_for_canonical_dir() {
        let cfg = config(&[(MA_MOUNT_PATH_ENV, "/mnt"), (MA_HOME_ENV, "/home/x")]);
        assert_eq!(cfg.canonical_dir, PathBuf::from("/home/x/rank_table"));
        assert_eq!(cfg.workspace_dir, PathBuf::from("/mnt/workspace"));

        let cfg = config(&[(MA_MOUNT_PATH_ENV, "/mnt")]);
        assert_eq!(cfg.canonical_dir, PathBuf::from("/mnt/rank_table"));
    }

    #[test]
    fn workspace_falls_back_to_fmk_env() {
        let cfg = config(&[(FMK_WORKSPACE_ENV, "/ws")]);
        assert_eq!(cfg.workspace_dir, PathBuf::from("/ws"));
    }

    #[test]
    fn pod_name_prefers_batch_variable() {
        let cfg = config(&[(POD_NAME_ENV, "job-3"), (INSTANCE_NAME_ENV, "other-1")]);
        assert_eq!(cfg.hints.pod_name.as_deref(), Some("job-3"));

        let cfg = config(&[(INSTANCE_NAME_ENV, "other-1"), (HOST_IP_ENV, "10.0.0.2")]);
        assert_eq!(cfg.hints.pod_name.as_deref(), Some("other-1"));
        assert_eq!(cfg.hints.host_ip.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn job_id_sources() {
        let cfg = config(&[(BATCH_JOB_ID_ENV, "job-42"), (VJ_NAME_ENV, "ma-job-7")]);
        assert_eq!(cfg.job_id, "job-42");

        let cfg = config(&[(VJ_NAME_ENV, "ma-job-7-ma-job")]);
        assert_eq!(cfg.job_id, "modelarts-job-7-ma-job");
    }

    #[test]
    fn log_dir_requires_existing_path() {
        let tmp = TempDir::new("config-log");
        let batch = tmp.path().join("batch");
        std::fs::create_dir_all(&batch).unwrap();

        let cfg = config(&[(BATCH_LOG_PATH_ENV, batch.to_str().unwrap())]);
        assert_eq!(cfg.log_dir, batch);

        let cfg = config(&[(BATCH_LOG_PATH_ENV, "/definitely/not/here")]);
        assert_eq!(cfg.log_dir, PathBuf::from(DEFAULT_LOG_DIR));

        std::fs::create_dir_all(tmp.path().join("log")).unwrap();
        let cfg = config(&[(MA_MOUNT_PATH_ENV, tmp.path().to_str().unwrap())]);
        assert_eq!(cfg.log_dir, tmp.path().join("log"));
    }

    #[test]
    fn ready_timeout_is_parsed() {
        let cfg = config(&[(READY_TIMEOUT_ENV, "30")]);
        assert_eq!(cfg.ready_timeout, Some(Duration::from_secs(30)));

        let cfg = config(&[(READY_TIMEOUT_ENV, "soon")]);
        assert!(cfg.ready_timeout.is_none());
    }
}
