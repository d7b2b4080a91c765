//! Node resolution shared by `run` and `init`.
use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use dvrun_core::{
    NodeConfig, NoRoutePlanner, RankTable, apply_route_plan, rank_exports, route::ROUTE_PLAN_ENV,
    route_plan_enabled,
};
use dvrun_exec::TerminationListener;
use dvrun_model::ResolvedNode;

/// Wait for the descriptor, normalize it and resolve the current node.
///
/// A termination signal while waiting aborts the wait.
pub async fn resolve(cfg: &NodeConfig) -> anyhow::Result<ResolvedNode> {
    let listener = TerminationListener::install()?;
    let node = resolve_with(cfg, listener.token()).await?;
    Ok(node)
}

pub async fn resolve_with(cfg: &NodeConfig, cancel: &CancellationToken) -> anyhow::Result<ResolvedNode> {
    info!(
        target: "dvrun.agentd",
        descriptor = %cfg.descriptor_path.display(),
        "waiting for rank table"
    );
    let table = RankTable::load(cfg, cancel)
        .await
        .context("loading rank table")?;
    let node = table.resolve(&cfg.hints).context("resolving current node")?;

    let enabled = route_plan_enabled(std::env::var(ROUTE_PLAN_ENV).ok().as_deref());
    Ok(apply_route_plan(&NoRoutePlanner, enabled, node))
}

/// `init`: print the node's rank variables as `export` lines.
pub async fn print_exports() -> anyhow::Result<()> {
    let cfg = NodeConfig::from_env();
    let node = resolve(&cfg).await?;
    for (key, value) in rank_exports(&node).resolved() {
        println!("export {key}={}", shell_quote(value));
    }
    Ok(())
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_single_quotes() {
        assert_eq!(shell_quote("/a b"), "'/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
