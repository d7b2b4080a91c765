use serde::{Deserialize, Serialize};

use crate::{Instance, Server};

/// The only `status` value under which a descriptor may be read further.
pub const COMPLETED_STATUS: &str = "completed";

/// `version` value that marks a generation-1 descriptor.
pub const DESCRIPTOR_VERSION_V1: &str = "1.0";

/// Schema generation of a topology descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// Group/instance layout written by the container orchestrator; no rank ids.
    V0,
    /// Flat server list with job-global rank ids.
    V1,
}

/// A group of instances in a generation-0 descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub group_name: String,
    #[serde(default, with = "super::count")]
    pub device_count: u32,
    #[serde(default, with = "super::count")]
    pub instance_count: u32,
    #[serde(default)]
    pub instance_list: Vec<Instance>,
}

/// Generation-0 descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyV0 {
    pub status: String,
    #[serde(default, with = "super::count")]
    pub group_count: u32,
    #[serde(default)]
    pub group_list: Vec<Group>,
}

/// Generation-1 descriptor; also the canonical internal form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyV1 {
    pub status: String,
    pub version: String,
    #[serde(default, with = "super::count")]
    pub server_count: u32,
    #[serde(default)]
    pub server_list: Vec<Server>,
}

/// A descriptor of either generation, resolved once when it is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Topology {
    V1(TopologyV1),
    V0(TopologyV0),
}

impl TopologyV0 {
    pub fn is_completed(&self) -> bool {
        self.status == COMPLETED_STATUS
    }

    /// Sum of the declared `device_count` of every group.
    pub fn device_count(&self) -> usize {
        self.group_list.iter().map(|g| g.device_count as usize).sum()
    }

    /// All instances, group by group, in list order.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.group_list.iter().flat_map(|g| g.instance_list.iter())
    }
}

impl TopologyV1 {
    /// An empty, completed generation-1 descriptor.
    pub fn completed() -> Self {
        Self {
            status: COMPLETED_STATUS.to_string(),
            version: DESCRIPTOR_VERSION_V1.to_string(),
            server_count: 0,
            server_list: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == COMPLETED_STATUS
    }

    /// Number of devices actually listed across all servers.
    pub fn device_count(&self) -> usize {
        self.server_list.iter().map(|s| s.device.len()).sum()
    }

    pub fn server(&self, server_id: &str) -> Option<&Server> {
        self.server_list.iter().find(|s| s.server_id == server_id)
    }
}

impl Topology {
    pub fn generation(&self) -> Generation {
        match self {
            Topology::V0(_) => Generation::V0,
            Topology::V1(_) => Generation::V1,
        }
    }

    pub fn status(&self) -> &str {
        match self {
            Topology::V0(t) => &t.status,
            Topology::V1(t) => &t.status,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status() == COMPLETED_STATUS
    }

    pub fn device_count(&self) -> usize {
        match self {
            Topology::V0(t) => t.device_count(),
            Topology::V1(t) => t.device_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V0: &str = r#"{
        "status": "completed",
        "group_count": "1",
        "group_list": [{
            "group_name": "job-arm-d",
            "device_count": "2",
            "instance_count": "1",
            "instance_list": [{
                "pod_name": "jobb0f1370b-job-mindspore-0",
                "server_id": "192.168.6.101",
                "devices": [
                    {"device_id": "0", "device_ip": "192.1.244.169"},
                    {"device_id": "1", "device_ip": "192.1.244.170"}
                ]
            }]
        }]
    }"#;

    const V1: &str = r#"{
        "status": "completed",
        "version": "1.0",
        "server_count": "1",
        "server_list": [{
            "server_id": "192.168.6.101",
            "device": [{"device_id": "0", "device_ip": "192.1.244.169", "rank_id": "0"}]
        }]
    }"#;

    #[test]
    fn parses_generation_zero() {
        let topo: Topology = serde_json::from_str(V0).unwrap();
        assert_eq!(topo.generation(), Generation::V0);
        assert!(topo.is_completed());
        assert_eq!(topo.device_count(), 2);

        let Topology::V0(v0) = topo else { unreachable!() };
        assert_eq!(v0.group_count, 1);
        assert_eq!(v0.instances().count(), 1);
        assert!(v0.instances().all(|i| i.devices.iter().all(|d| d.rank_id.is_none())));
    }

    #[test]
    fn parses_generation_one() {
        let topo: Topology = serde_json::from_str(V1).unwrap();
        assert_eq!(topo.generation(), Generation::V1);
        assert_eq!(topo.device_count(), 1);

        let Topology::V1(v1) = topo else { unreachable!() };
        assert_eq!(v1.server("192.168.6.101").map(|s| s.device.len()), Some(1));
        assert!(v1.server("10.0.0.1").is_none());
    }

    #[test]
    fn counts_accept_numbers_and_serialize_as_strings() {
        let json = r#"{"status":"completed","version":"1.0","server_count":2,"server_list":[]}"#;
        let v1: TopologyV1 = serde_json::from_str(json).unwrap();
        assert_eq!(v1.server_count, 2);

        let out = serde_json::to_value(&v1).unwrap();
        assert_eq!(out["server_count"], "2");
    }

    #[test]
    fn rejects_garbage_count() {
        let json = r#"{"status":"completed","version":"1.0","server_count":"two","server_list":[]}"#;
        assert!(serde_json::from_str::<TopologyV1>(json).is_err());
    }
}
