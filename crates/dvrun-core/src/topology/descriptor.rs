use std::{
    io,
    path::Path,
    time::{Duration, Instant},
};

use dvrun_model::{COMPLETED_STATUS, Topology, TopologyV0, TopologyV1};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::TopologyError;

/// Decode descriptor bytes read from `path`.
///
/// The `status` gate is checked before anything else; a descriptor that is not `completed` yet
/// yields [`TopologyError::NotReady`] and is not decoded further. A `version` key selects the
/// generation-1 schema.
pub fn parse_descriptor(path: &Path, bytes: &[u8]) -> Result<Topology, TopologyError> {
    let parse_err = |source| TopologyError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let value: Value = serde_json::from_slice(bytes).map_err(parse_err)?;

    let status = value.get("status").and_then(Value::as_str).unwrap_or_default();
    if status != COMPLETED_STATUS {
        return Err(TopologyError::NotReady {
            path: path.to_path_buf(),
            reason: format!("status is {status:?}"),
        });
    }

    if value.get("version").is_some() {
        serde_json::from_value::<TopologyV1>(value)
            .map(Topology::V1)
            .map_err(parse_err)
    } else {
        serde_json::from_value::<TopologyV0>(value)
            .map(Topology::V0)
            .map_err(parse_err)
    }
}

/// Read and decode a descriptor once.
pub fn read_descriptor(path: &Path) -> Result<Topology, TopologyError> {
    match std::fs::read(path) {
        Ok(bytes) => parse_descriptor(path, &bytes),
        Err(e) => Err(read_error(path, e)),
    }
}

/// Poll `path` until it holds a completed descriptor.
///
/// Without a `timeout` this waits for as long as it takes the orchestrator to publish the file.
/// Only [`TopologyError::NotReady`] is retried; any other failure is returned at once.
pub async fn wait_for_ready(
    path: &Path,
    poll: Duration,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<Topology, TopologyError> {
    info!(target: "dvrun.core.topology", path = %path.display(), "waiting for descriptor");
    let started = Instant::now();

    loop {
        let attempt = match tokio::fs::read(path).await {
            Ok(bytes) => parse_descriptor(path, &bytes),
            Err(e) => Err(read_error(path, e)),
        };

        match attempt {
            Ok(topology) => {
                info!(
                    target: "dvrun.core.topology",
                    generation = ?topology.generation(),
                    devices = topology.device_count(),
                    "descriptor is ready"
                );
                return Ok(topology);
            }
            Err(TopologyError::NotReady { reason, .. }) => {
                debug!(target: "dvrun.core.topology", %reason, "descriptor not ready");
            }
            Err(e) => return Err(e),
        }

        if let Some(limit) = timeout
            && started.elapsed() >= limit
        {
            return Err(TopologyError::Timeout {
                path: path.to_path_buf(),
                waited: started.elapsed(),
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(TopologyError::Cancelled { path: path.to_path_buf() });
            }
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

fn read_error(path: &Path, e: io::Error) -> TopologyError {
    if e.kind() == io::ErrorKind::NotFound {
        TopologyError::NotReady {
            path: path.to_path_buf(),
            reason: "file does not exist".to_string(),
        }
    } else {
        TopologyError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    }
}
