use std::fs;

use dvrun_model::ProcEnv;

use super::{DiagPaths, Derived};
use crate::error::ExecResult;

pub(crate) const DIAG_MODE_ENV: &str = "MA_DIAG_MODE_ENV";
pub(crate) const RUN_MODE_ENV: &str = "MA_RUN_MODE_ENV";
pub(crate) const ENGINE_VERSION_ENV: &str = "MA_ENGINE_VERSION";

const FRAMEWORK_NAME: &str = "mindspore";
/// First framework release with crash-record support.
const FAULTS_MIN_VERSION: [u32; 2] = [1, 4];

/// Diagnostic tuning requested by the platform.
///
/// A diagnostic mode takes precedence over a run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagProfile {
    Faults,
    /// `accuracy` and `profile` diagnostics.
    DiagnosticData,
    Performance,
    Normal,
}

impl DiagProfile {
    pub fn select(ambient: &ProcEnv) -> Option<Self> {
        match ambient.get(DIAG_MODE_ENV) {
            Some("faults") => return Some(Self::Faults),
            Some("accuracy" | "profile") => return Some(Self::DiagnosticData),
            _ => {}
        }
        match ambient.get(RUN_MODE_ENV) {
            Some("performance") => Some(Self::Performance),
            Some("normal") => Some(Self::Normal),
            _ => None,
        }
    }

    pub(crate) fn apply(
        self,
        env: &mut Derived<'_>,
        paths: &DiagPaths,
        engine_version: Option<&str>,
    ) -> ExecResult<()> {
        let framework_log = paths.framework_log.to_string_lossy();
        match self {
            Self::Faults => {
                env.set("PRINT_MODEL", "1");
                env.set("DUMP_GE_GRAPH", "2");
                env.set("DUMP_GRAPH_LEVEL", "2");
                env.set("ASCEND_GLOBAL_LOG_LEVEL", "1");
                env.set("ASCEND_HOST_LOG_FILE_NUM", "1000");
                let collect = env.set_path("NPU_COLLECT_PATH", &paths.npu_collect);
                fs::create_dir_all(collect.join("extra-info").join("graph"))?;

                let records_crashes = engine_version
                    .and_then(FrameworkVersion::parse)
                    .is_some_and(|v| v.supports_crash_records());
                if records_crashes {
                    env.set("GLOG_v", "1");
                    env.set("GLOG_log_dir", &framework_log);
                    env.set("GLOG_logtostderr", "0");
                    env.set("MS_RDR_ENABLE", "1");
                    env.set("MS_RDR_PATH", &framework_log);
                    env.set("MS_OM_PATH", &framework_log);
                }
            }
            Self::DiagnosticData => {
                env.set("MS_DIAGNOSTIC_DATA_PATH", &paths.diagnostic_data.to_string_lossy());
            }
            Self::Performance => {
                env.set("ASCEND_GLOBAL_LOG_LEVEL", "3");
                env.set("ASCEND_GLOBAL_EVENT_LEVEL", "0");
                env.set("GLOG_v", "3");
                env.set("GLOG_log_dir", &framework_log);
                env.set("GLOG_logtostderr", "0");
                env.set("MS_OM_PATH", &framework_log);
            }
            Self::Normal => {
                env.set("GLOG_v", "1");
                env.set("GLOG_log_dir", &framework_log);
                env.set("GLOG_logtostderr", "0");
                env.set("MS_OM_PATH", &framework_log);
            }
        }
        Ok(())
    }
}

/// Framework name and version parsed from an engine tag such as `mindspore_1.7.0-cann_5.1.0-py_3.7`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkVersion {
    pub name: String,
    pub version: Vec<u32>,
}

impl FrameworkVersion {
    pub fn parse(tag: &str) -> Option<Self> {
        let head = tag.split('-').next()?;
        let (name, version) = head.split_once('_')?;
        let version = version
            .split('_')
            .next()?
            .split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().ok()
            })
            .collect::<Option<Vec<u32>>>()?;
        Some(Self {
            name: name.to_string(),
            version,
        })
    }

    fn supports_crash_records(&self) -> bool {
        self.name.contains(FRAMEWORK_NAME) && self.version.as_slice() >= FAULTS_MIN_VERSION.as_slice()
    }
}
