mod count;

mod device;
pub use device::Device;

mod instance;
pub use instance::{Instance, Server};

mod topology;
pub use topology::{
    COMPLETED_STATUS, DESCRIPTOR_VERSION_V1, Generation, Group, Topology, TopologyV0, TopologyV1,
};

mod node;
pub use node::ResolvedNode;

mod kv;
pub use kv::KeyValue;

mod proc_env;
pub use proc_env::ProcEnv;

/// Job-global, zero-based rank identifier as it appears in descriptors.
pub type RankId = String;
