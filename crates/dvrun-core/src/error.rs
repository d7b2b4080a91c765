use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TopologyError {
    /// Descriptor missing or its `status` is not `completed` yet.
    #[error("descriptor {path} is not ready: {reason}")]
    NotReady { path: PathBuf, reason: String },

    #[error("failed to read descriptor {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed descriptor {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("descriptor {path} is still not ready after {waited:?}")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("wait for descriptor {path} cancelled")]
    Cancelled { path: PathBuf },

    #[error("failed to persist canonical descriptor {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("current node not found in topology: {0}")]
    Resolution(String),
}

impl TopologyError {
    /// `true` for the only error the wait loop retries on.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, TopologyError::NotReady { .. })
    }
}
