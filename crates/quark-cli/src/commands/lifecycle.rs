use quark_core::{InstanceRoles, OpContext, Settings};
use quark_topology::TopologyAssigner;
use tracing::info;

use super::blueprint::load;
use super::{orchestrator, print_json};
use crate::{BackendArgs, BlueprintArgs};

pub async fn create(
    ctx: &OpContext,
    settings: Settings,
    blueprint: &BlueprintArgs,
    backend: &BackendArgs,
) -> anyhow::Result<()> {
    let options = load(blueprint)?;
    let orchestrator = orchestrator(settings, backend)?;
    let topology = TopologyAssigner::new(options);
    let report = orchestrator
        .create_cluster(ctx, &topology, InstanceRoles::all())
        .await?;
    print_json(&report)
}

pub async fn delete(
    ctx: &OpContext,
    settings: Settings,
    blueprint: &BlueprintArgs,
    backend: &BackendArgs,
) -> anyhow::Result<()> {
    let options = load(blueprint)?;
    let deleted = orchestrator(settings, backend)?
        .delete_cluster(ctx, &options.info)
        .await?;
    info!(cluster = %options.info, deleted, "done");
    Ok(())
}

pub async fn update(
    ctx: &OpContext,
    settings: Settings,
    blueprint: &BlueprintArgs,
    backend: &BackendArgs,
) -> anyhow::Result<()> {
    let options = load(blueprint)?;
    let report = orchestrator(settings, backend)?
        .update_cluster(ctx, &options.info)
        .await?;
    print_json(&report)
}

pub async fn add_instance(
    ctx: &OpContext,
    settings: Settings,
    blueprint: &BlueprintArgs,
    backend: &BackendArgs,
    proxy: bool,
) -> anyhow::Result<()> {
    let options = load(blueprint)?;
    let roles = if proxy {
        InstanceRoles::worker()
    } else {
        InstanceRoles::all()
    };
    let report = orchestrator(settings, backend)?
        .add_instance(ctx, &TopologyAssigner::new(options), roles)
        .await?;
    print_json(&report)
}

pub async fn remove_instance(
    ctx: &OpContext,
    settings: Settings,
    blueprint: &BlueprintArgs,
    backend: &BackendArgs,
    name: &str,
) -> anyhow::Result<()> {
    let options = load(blueprint)?;
    let report = orchestrator(settings, backend)?
        .remove_instance(ctx, &options.info, name)
        .await?;
    print_json(&report)
}
