use quark_core::{Blueprint, ClusterOptions, InstanceRoles};
use quark_topology::TopologyAssigner;

use super::print_json;
use crate::BlueprintArgs;

/// Cluster options from the blueprint with the selected profile applied.
pub fn load(args: &BlueprintArgs) -> anyhow::Result<ClusterOptions> {
    let blueprint = Blueprint::from_file(&args.blueprint)?;
    Ok(ClusterOptions::from_blueprint(&blueprint, &args.profile)?)
}

pub fn profile(args: &BlueprintArgs) -> anyhow::Result<()> {
    let blueprint = Blueprint::from_file(&args.blueprint)?;
    print_json(&blueprint.resolve_profile(&args.profile)?)
}

pub fn plan(args: &BlueprintArgs) -> anyhow::Result<()> {
    let topology = TopologyAssigner::new(load(args)?);
    print_json(&topology.plan(InstanceRoles::all())?)
}
