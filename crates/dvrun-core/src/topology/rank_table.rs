use std::path::{Path, PathBuf};

use dvrun_model::{Generation, Instance, ResolvedNode, Server, Topology, TopologyV0, TopologyV1};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{normalize_v0, order_instances, persist_canonical, wait_for_ready};
use crate::{
    config::{NodeConfig, NodeHints},
    error::TopologyError,
};

/// Generation-0 lookup by pod name.
///
/// The first exact match across all groups wins. Without a hint the first instance of the first
/// group that declares devices is the default; groups with `device_count == 0` are not part of the
/// normalized descriptor.
pub fn current_instance_v0<'a>(v0: &'a TopologyV0, pod_name: Option<&str>) -> Option<&'a Instance> {
    match pod_name {
        Some(name) => v0.instances().find(|i| i.pod_name == name),
        None => v0
            .group_list
            .iter()
            .filter(|g| g.device_count != 0)
            .find_map(|g| g.instance_list.first()),
    }
}

/// Generation-1 lookup by host address.
///
/// A single server is the current node regardless of the hint. With several servers the hint
/// selects by equality, and without a hint the first listed server is the default.
pub fn current_server_v1<'a>(v1: &'a TopologyV1, host_ip: Option<&str>) -> Option<&'a Server> {
    match (v1.server_list.as_slice(), host_ip) {
        ([only], _) => Some(only),
        (servers, Some(ip)) => servers.iter().find(|s| s.server_id == ip),
        (servers, None) => servers.first(),
    }
}

/// A ready descriptor together with its canonical generation-1 form.
#[derive(Debug, Clone)]
pub struct RankTable {
    path: PathBuf,
    canonical: TopologyV1,
    source: Topology,
}

impl RankTable {
    /// Wrap a descriptor that has passed the readiness gate.
    ///
    /// Generation 0 is normalized and persisted under `canonical_dir`; generation 1 is used from
    /// `source_path` as is.
    pub fn from_topology(
        topology: Topology,
        source_path: &Path,
        canonical_dir: &Path,
    ) -> Result<Self, TopologyError> {
        match topology {
            Topology::V1(v1) => Ok(Self {
                path: source_path.to_path_buf(),
                canonical: v1.clone(),
                source: Topology::V1(v1),
            }),
            Topology::V0(v0) => {
                let ordered = order_instances(&v0);
                let canonical = normalize_v0(&ordered);
                let path = persist_canonical(&canonical, canonical_dir)?;
                Ok(Self {
                    path,
                    canonical,
                    source: Topology::V0(ordered),
                })
            }
        }
    }

    /// Wait for the configured descriptor and load it.
    pub async fn load(cfg: &NodeConfig, cancel: &CancellationToken) -> Result<Self, TopologyError> {
        let topology = wait_for_ready(
            &cfg.descriptor_path,
            cfg.poll_interval,
            cfg.ready_timeout,
            cancel,
        )
        .await?;

        if let Some(expected) = cfg.expected_generation
            && expected != topology.generation()
        {
            warn!(
                target: "dvrun.core.topology",
                ?expected,
                found = ?topology.generation(),
                "descriptor generation differs from what the environment announced"
            );
        }

        Self::from_topology(topology, &cfg.descriptor_path, &cfg.canonical_dir)
    }

    /// Path of the canonical descriptor.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn canonical(&self) -> &TopologyV1 {
        &self.canonical
    }

    pub fn generation(&self) -> Generation {
        self.source.generation()
    }

    /// Total devices in the job, counted by the rule of the source generation.
    pub fn device_count(&self) -> usize {
        self.source.device_count()
    }

    pub fn server(&self, server_id: &str) -> Option<&Server> {
        let server = self.canonical.server(server_id);
        if server.is_none() {
            error!(target: "dvrun.core.topology", server_id, "server is not found");
        }
        server
    }

    /// The current node's devices, with rank ids.
    ///
    /// Generation 0 matches the pod name, then joins on `server_id` into the canonical form.
    pub fn current_instance(&self, hints: &NodeHints) -> Option<Instance> {
        let found = match &self.source {
            Topology::V0(v0) => {
                let instance = current_instance_v0(v0, hints.pod_name.as_deref())?;
                let server = self.server(&instance.server_id)?;
                let mut resolved = Instance::from_server(server);
                resolved.pod_name = instance.pod_name.clone();
                resolved
            }
            Topology::V1(v1) => Instance::from_server(current_server_v1(v1, hints.host_ip.as_deref())?),
        };
        Some(found)
    }

    /// Resolve the current node or fail with [`TopologyError::Resolution`].
    pub fn resolve(&self, hints: &NodeHints) -> Result<ResolvedNode, TopologyError> {
        let Some(current_instance) = self.current_instance(hints) else {
            error!(target: "dvrun.core.topology", ?hints, "current node is not in the topology");
            return Err(TopologyError::Resolution(format!(
                "no node matches pod {:?} / host {:?}",
                hints.pod_name, hints.host_ip
            )));
        };

        info!(
            target: "dvrun.core.topology",
            server = %current_instance.server_id,
            local_devices = current_instance.devices.len(),
            total_devices = self.device_count(),
            "current node resolved"
        );

        Ok(ResolvedNode {
            current_instance,
            total_device_count: self.device_count(),
            descriptor_path: self.path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testutil::TempDir;

    const V0: &str = r#"{
        "status": "completed",
        "group_count": "2",
        "group_list": [
            {"group_name": "idle", "device_count": "0", "instance_count": "0", "instance_list": []},
            {"group_name": "train", "device_count": "4", "instance_count": "2", "instance_list": [
                {"pod_name": "job-train-1", "server_id": "10.0.0.2", "devices": [
                    {"device_id": "0", "device_ip": "192.1.2.0"},
                    {"device_id": "1", "device_ip": "192.1.2.1"}
                ]},
                {"pod_name": "job-train-0", "server_id": "10.0.0.1", "devices": [
                    {"device_id": "0", "device_ip": "192.1.1.0"},
                    {"device_id": "1", "device_ip": "192.1.1.1"}
                ]}
            ]}
        ]
    }"#;

    const V1_MULTI: &str = r#"{
        "status": "completed", "version": "1.0", "server_count": "2",
        "server_list": [
            {"server_id": "10.0.0.1", "device": [{"device_id": "0", "device_ip": "a", "rank_id": "0"}]},
            {"server_id": "10.0.0.2", "device": [{"device_id": "0", "device_ip": "b", "rank_id": "1"}]}
        ]
    }"#;

    const V1_SINGLE: &str = r#"{
        "status": "completed", "version": "1.0", "server_count": "1",
        "server_list": [
            {"server_id": "10.0.0.7", "device": [
                {"device_id": "4", "device_ip": "a", "rank_id": "0"},
                {"device_id": "5", "device_ip": "b", "rank_id": "1"}
            ]}
        ]
    }"#;

    fn table(json: &str, tmp: &TempDir) -> RankTable {
        let src = tmp.path().join("source.json");
        std::fs::write(&src, json).unwrap();
        let topo = crate::topology::read_descriptor(&src).unwrap();
        RankTable::from_topology(topo, &src, &tmp.path().join("rank_table")).unwrap()
    }

    fn hints(pod: Option<&str>, ip: Option<&str>) -> NodeHints {
        NodeHints {
            pod_name: pod.map(str::to_string),
            host_ip: ip.map(str::to_string),
        }
    }

    #[test]
    fn generation_zero_is_persisted_and_resolved_by_pod() {
        let tmp = TempDir::new("rank-table");
        let rt = table(V0, &tmp);

        assert_eq!(rt.generation(), Generation::V0);
        assert_eq!(rt.path(), tmp.path().join("rank_table/jobstart_hccl.json"));
        assert!(rt.path().exists());
        assert_eq!(rt.device_count(), 4);
        assert_eq!(rt.canonical().device_count(), 4);

        let node = rt.resolve(&hints(Some("job-train-1"), None)).unwrap();
        assert_eq!(node.current_instance.pod_name, "job-train-1");
        assert_eq!(node.current_instance.server_id, "10.0.0.2");
        let ranks: Vec<_> = node.current_instance.devices.iter().map(|d| d.rank()).collect();
        assert_eq!(ranks, vec!["2", "3"]);
        assert_eq!(node.total_device_count, 4);
        assert_eq!(node.descriptor_path, rt.path());
    }

    #[test]
    fn generation_zero_without_hint_takes_lowest_pod_of_first_non_empty_group() {
        let tmp = TempDir::new("rank-table");
        let rt = table(V0, &tmp);

        let ins = rt.current_instance(&NodeHints::default()).unwrap();
        assert_eq!(ins.pod_name, "job-train-0");
        assert_eq!(ins.rank_start(), Some("0"));
    }

    #[test]
    fn generation_zero_default_skips_groups_without_devices() {
        let tmp = TempDir::new("rank-table");
        let json = V0.replace(
            r#""instance_count": "0", "instance_list": []"#,
            r#""instance_count": "1", "instance_list": [
                {"pod_name": "job-idle-0", "server_id": "10.0.0.9", "devices": []}
            ]"#,
        );
        let rt = table(&json, &tmp);

        let node = rt.resolve(&NodeHints::default()).unwrap();
        assert_eq!(node.current_instance.pod_name, "job-train-0");
        assert_eq!(node.current_instance.server_id, "10.0.0.1");
    }

    #[test]
    fn generation_zero_unknown_pod_fails() {
        let tmp = TempDir::new("rank-table");
        let rt = table(V0, &tmp);

        let err = rt.resolve(&hints(Some("job-train-9"), None)).unwrap_err();
        assert!(matches!(err, TopologyError::Resolution(_)));
    }

    #[test]
    fn single_server_ignores_host_hint() {
        let tmp = TempDir::new("rank-table");
        let rt = table(V1_SINGLE, &tmp);

        for ip in [None, Some("10.0.0.7"), Some("172.16.0.1")] {
            let ins = rt.current_instance(&hints(None, ip)).unwrap();
            assert_eq!(ins.server_id, "10.0.0.7");
            assert_eq!(ins.devices.len(), 2);
        }
    }

    #[test]
    fn multi_server_selects_by_host_ip() {
        let tmp = TempDir::new("rank-table");
        let rt = table(V1_MULTI, &tmp);

        assert_eq!(rt.path(), tmp.path().join("source.json"));

        let ins = rt.current_instance(&hints(None, Some("10.0.0.2"))).unwrap();
        assert_eq!(ins.server_id, "10.0.0.2");
        assert_eq!(ins.rank_start(), Some("1"));

        let ins = rt.current_instance(&hints(None, None)).unwrap();
        assert_eq!(ins.server_id, "10.0.0.1");

        assert!(rt.current_instance(&hints(None, Some("10.9.9.9"))).is_none());
    }

    #[tokio::test]
    async fn load_waits_and_normalizes() {
        let tmp = TempDir::new("rank-table");
        let src = tmp.path().join("jobstart_hccl.json");
        std::fs::write(&src, V0).unwrap();

        let cfg = NodeConfig::from_lookup(|_| None)
            .with_poll_interval(Duration::from_millis(5))
            .with_ready_timeout(Some(Duration::from_secs(5)));
        let cfg = NodeConfig {
            descriptor_path: src,
            canonical_dir: tmp.path().join("rank_table"),
            ..cfg
        };

        let rt = RankTable::load(&cfg, &CancellationToken::new()).await.unwrap();
        assert_eq!(rt.generation(), Generation::V0);
        assert_eq!(rt.canonical().server_count, 2);
    }
}
