use std::path::PathBuf;

use thiserror::Error;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("missing program")]
    MissingProgram,
    #[error("spawn failed for rank {rank_id} (device {device_id}): {source}")]
    Spawn {
        rank_id: String,
        device_id: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker rank {rank_id} exited with code {code}; output in {}", log_path.display())]
    WorkerFailed {
        code: i32,
        rank_id: String,
        log_path: PathBuf,
    },
    #[error("signal listener: {0}")]
    Signal(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}
