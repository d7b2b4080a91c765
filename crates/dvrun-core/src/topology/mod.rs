//! Topology descriptor handling.
//!
//! A descriptor is read once, dispatched to its schema generation, and (for generation 0)
//! normalized into the canonical generation-1 form. Resolution of the current node then works on
//! the canonical form only.
mod descriptor;
pub use descriptor::{parse_descriptor, read_descriptor, wait_for_ready};

mod normalize;
pub use normalize::{normalize_v0, order_instances, persist_canonical};

mod rank_table;
pub use rank_table::{RankTable, current_instance_v0, current_server_v1};
