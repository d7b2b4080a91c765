//! Seam for an optional network-topology accelerator.
//!
//! A planner may rewrite the descriptor and hand back a replacement for the current instance.
//! Returning `None` keeps the resolved instance.
use std::path::Path;

use dvrun_model::{Instance, ResolvedNode};
use tracing::info;

pub const ROUTE_PLAN_ENV: &str = "ROUTE_PLAN";

pub trait RoutePlanner: Send + Sync {
    fn name(&self) -> &'static str;

    fn plan(&self, descriptor: &Path, current: &Instance) -> Option<Instance>;
}

/// Planner used when no accelerator is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRoutePlanner;

impl RoutePlanner for NoRoutePlanner {
    fn name(&self) -> &'static str {
        "none"
    }

    fn plan(&self, _descriptor: &Path, _current: &Instance) -> Option<Instance> {
        None
    }
}

/// Route planning is off unless the switch is set to anything but `false`.
pub fn route_plan_enabled(switch: Option<&str>) -> bool {
    switch.is_some_and(|v| !v.eq_ignore_ascii_case("false"))
}

/// Let `planner` replace the node's instance when planning is enabled.
pub fn apply_route_plan(planner: &dyn RoutePlanner, enabled: bool, node: ResolvedNode) -> ResolvedNode {
    if !enabled {
        info!(target: "dvrun.core.route", "route planning disabled");
        return node;
    }

    match planner.plan(&node.descriptor_path, &node.current_instance) {
        Some(instance) => {
            info!(
                target: "dvrun.core.route",
                planner = planner.name(),
                server = %instance.server_id,
                "route plan replaced current instance"
            );
            ResolvedNode {
                current_instance: instance,
                ..node
            }
        }
        None => {
            info!(target: "dvrun.core.route", planner = planner.name(), "route plan kept current instance");
            node
        }
    }
}
