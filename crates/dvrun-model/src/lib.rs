//! Value types shared by the launcher crates.
//!
//! Two generations of the cluster topology descriptor are modeled here, together with the
//! per-node result of resolving one of them and the environment list handed to worker processes.
mod domain;
pub use domain::*;
