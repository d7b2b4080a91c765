use serde::{Deserialize, Serialize};

use crate::RankId;

/// One accelerator addressable within a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Physical device id assigned by the topology.
    pub device_id: String,
    /// Address of the device's interconnect port.
    pub device_ip: String,
    /// Job-global rank.
    ///
    /// Absent in generation-0 descriptors until normalization assigns it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_id: Option<RankId>,
}

impl Device {
    pub fn new(device_id: impl Into<String>, device_ip: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_ip: device_ip.into(),
            rank_id: None,
        }
    }

    pub fn with_rank(mut self, rank_id: impl Into<RankId>) -> Self {
        self.rank_id = Some(rank_id.into());
        self
    }

    /// Rank id, or an empty string when none has been assigned yet.
    pub fn rank(&self) -> &str {
        self.rank_id.as_deref().unwrap_or_default()
    }
}
