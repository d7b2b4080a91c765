use std::path::PathBuf;

use crate::Instance;

/// The current node's slice of the job.
///
/// Built once at process start and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    /// Devices of this node, each carrying its job-global rank id.
    pub current_instance: Instance,
    /// Number of devices across the whole job (the rank size).
    pub total_device_count: usize,
    /// Location of the canonical generation-1 descriptor.
    pub descriptor_path: PathBuf,
}
