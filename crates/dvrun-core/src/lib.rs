pub mod config;
pub use config::{NodeConfig, NodeHints};

pub mod error;
pub use error::TopologyError;

pub mod system;
pub use system::DeviceNumbering;

pub mod topology;
pub use topology::{RankTable, read_descriptor, wait_for_ready};

pub mod route;
pub use route::{NoRoutePlanner, RoutePlanner, apply_route_plan, route_plan_enabled};

pub mod exports;
pub use exports::rank_exports;

#[cfg(test)]
pub(crate) mod testutil;
