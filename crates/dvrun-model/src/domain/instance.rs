use serde::{Deserialize, Serialize};

use crate::Device;

/// One node's set of devices, as listed by a generation-0 descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Orchestrator pod name; empty when derived from a generation-1 server.
    #[serde(default)]
    pub pod_name: String,
    /// Node address, the join key between descriptor generations.
    pub server_id: String,
    #[serde(default, deserialize_with = "devices_or_null")]
    pub devices: Vec<Device>,
}

/// One node's set of devices, as listed by a generation-1 descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub server_id: String,
    #[serde(default)]
    pub device: Vec<Device>,
}

impl Instance {
    pub fn new(pod_name: impl Into<String>, server_id: impl Into<String>, devices: Vec<Device>) -> Self {
        Self {
            pod_name: pod_name.into(),
            server_id: server_id.into(),
            devices,
        }
    }

    /// Maps a generation-1 server onto an instance.
    ///
    /// Device order and rank ids are carried over untouched; the pod name is left empty.
    pub fn from_server(server: &Server) -> Self {
        Self {
            pod_name: String::new(),
            server_id: server.server_id.clone(),
            devices: server.device.clone(),
        }
    }

    /// Trailing numeric suffix of the pod name (`job-x-worker-15` yields `15`).
    ///
    /// This is the natural rank ordering of instances inside a group.
    pub fn pod_index(&self) -> Option<u64> {
        let (_, suffix) = self.pod_name.rsplit_once('-')?;
        suffix.parse().ok()
    }

    /// Rank id of the first device, if any was assigned.
    pub fn rank_start(&self) -> Option<&str> {
        self.devices.first().and_then(|d| d.rank_id.as_deref())
    }
}

impl Server {
    pub fn new(server_id: impl Into<String>, device: Vec<Device>) -> Self {
        Self {
            server_id: server_id.into(),
            device,
        }
    }

    pub fn from_instance(instance: &Instance) -> Self {
        Self {
            server_id: instance.server_id.clone(),
            device: instance.devices.clone(),
        }
    }
}

impl From<&Server> for Instance {
    fn from(server: &Server) -> Self {
        Instance::from_server(server)
    }
}

impl From<&Instance> for Server {
    fn from(instance: &Instance) -> Self {
        Server::from_instance(instance)
    }
}

fn devices_or_null<'de, D>(deserializer: D) -> Result<Vec<Device>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Device>>::deserialize(deserializer)?.unwrap_or_default())
}
