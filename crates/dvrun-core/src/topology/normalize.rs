use std::{
    fs,
    path::{Path, PathBuf},
};

use dvrun_model::{Device, Server, TopologyV0, TopologyV1};
use tracing::info;

use crate::{config::DESCRIPTOR_FILE_NAME, error::TopologyError};

/// Sort every group's instances by the numeric suffix of their pod name.
///
/// Instances without a numeric suffix keep their relative order after the numbered ones.
pub fn order_instances(v0: &TopologyV0) -> TopologyV0 {
    let mut ordered = v0.clone();
    for group in &mut ordered.group_list {
        group
            .instance_list
            .sort_by_key(|ins| ins.pod_index().unwrap_or(u64::MAX));
    }
    ordered
}

/// Convert a generation-0 descriptor into the canonical generation-1 form.
///
/// Groups declaring no devices are skipped. Devices are walked group by group, instance by
/// instance (in pod-index order) and device by device, each receiving the next rank id from 0.
/// Servers appear in the order their id is first met, and a server lists its devices in walk
/// order.
pub fn normalize_v0(v0: &TopologyV0) -> TopologyV1 {
    let ordered = order_instances(v0);
    let mut servers: Vec<Server> = Vec::new();
    let mut next_rank = 0usize;

    for group in ordered.group_list.iter().filter(|g| g.device_count != 0) {
        for instance in &group.instance_list {
            let slot = match servers.iter().position(|s| s.server_id == instance.server_id) {
                Some(slot) => slot,
                None => {
                    servers.push(Server::new(instance.server_id.clone(), Vec::new()));
                    servers.len() - 1
                }
            };

            for device in &instance.devices {
                servers[slot].device.push(Device {
                    rank_id: Some(next_rank.to_string()),
                    ..device.clone()
                });
                next_rank += 1;
            }
        }
    }

    let mut v1 = TopologyV1::completed();
    v1.server_count = servers.len() as u32;
    v1.server_list = servers;
    v1
}

/// Write the canonical descriptor into `dir` and return its path.
///
/// The file is written next to its final name and renamed into place, so readers never observe a
/// partial document.
pub fn persist_canonical(v1: &TopologyV1, dir: &Path) -> Result<PathBuf, TopologyError> {
    let path = dir.join(DESCRIPTOR_FILE_NAME);
    let persist_err = |source| TopologyError::Persist {
        path: path.clone(),
        source,
    };

    fs::create_dir_all(dir).map_err(persist_err)?;

    let body = serde_json::to_vec(v1).map_err(|e| persist_err(e.into()))?;
    let staging = dir.join(format!(".{DESCRIPTOR_FILE_NAME}.tmp"));
    fs::write(&staging, body).map_err(persist_err)?;
    fs::rename(&staging, &path).map_err(persist_err)?;

    info!(
        target: "dvrun.core.topology",
        path = %path.display(),
        servers = v1.server_count,
        devices = v1.device_count(),
        "canonical descriptor written"
    );
    Ok(path)
}
