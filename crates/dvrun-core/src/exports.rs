use dvrun_model::{ProcEnv, ResolvedNode};

use crate::config::{HOST_IP_ENV, RANK_TABLE_FILE_ENV};

pub const RANK_START_ENV: &str = "RANK_START";
pub const RANK_SIZE_ENV: &str = "RANK_SIZE";

/// Variables that describe the resolved node to the job's own tooling.
///
/// `RANK_TABLE_FILE` points at the canonical descriptor, so anything started afterwards reads the
/// normalized form.
pub fn rank_exports(node: &ResolvedNode) -> ProcEnv {
    let mut env = ProcEnv::new();
    env.push(RANK_TABLE_FILE_ENV, node.descriptor_path.display().to_string());
    env.push(HOST_IP_ENV, node.current_instance.server_id.clone());
    if let Some(start) = node.current_instance.rank_start() {
        env.push(RANK_START_ENV, start);
    }
    env.push(RANK_SIZE_ENV, node.total_device_count.to_string());
    env
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use dvrun_model::{Device, Instance};

    use super::*;

    #[test]
    fn exports_describe_node() {
        let node = ResolvedNode {
            current_instance: Instance::new(
                "job-1",
                "10.0.0.2",
                vec![Device::new("0", "a").with_rank("8"), Device::new("1", "b").with_rank("9")],
            ),
            total_device_count: 16,
            descriptor_path: PathBuf::from("/home/ma-user/rank_table/jobstart_hccl.json"),
        };

        let env = rank_exports(&node);
        assert_eq!(env.get("RANK_TABLE_FILE"), Some("/home/ma-user/rank_table/jobstart_hccl.json"));
        assert_eq!(env.get("MA_CURRENT_HOST_IP"), Some("10.0.0.2"));
        assert_eq!(env.get("RANK_START"), Some("8"));
        assert_eq!(env.get("RANK_SIZE"), Some("16"));
    }
}
