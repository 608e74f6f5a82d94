use quark_cluster::CatalogKind;
use quark_core::{OpContext, Settings};

use super::{orchestrator, print_json};
use crate::{BackendArgs, CatalogArg};

pub async fn list(
    ctx: &OpContext,
    settings: Settings,
    kind: CatalogArg,
    backend: &BackendArgs,
) -> anyhow::Result<()> {
    let kind = match kind {
        CatalogArg::Regions => CatalogKind::Regions,
        CatalogArg::Images => CatalogKind::Images,
        CatalogArg::Keys => CatalogKind::Keys,
        CatalogArg::Plans => CatalogKind::Plans,
    };
    let entries = orchestrator(settings, backend)?.catalog(ctx, kind).await?;
    print_json(&entries)
}
