//! quarkctl — command-line front end for Quark.
//!
//! ```text
//! quarkctl plan --blueprint alpha.toml --profile large
//! quarkctl create --blueprint alpha.toml --inventory hosts.toml --discovery http://discovery:8087
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use quark_core::{OpContext, Settings};

mod commands;

#[derive(Parser)]
#[command(
    name = "quarkctl",
    about = "Quark — cluster lifecycle orchestrator",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Runtime settings file (TOML). Built-in defaults otherwise.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
pub struct BlueprintArgs {
    /// Cluster blueprint (TOML).
    #[arg(short, long)]
    pub blueprint: PathBuf,

    /// Profile to overlay on the blueprint defaults.
    #[arg(short, long, default_value = "")]
    pub profile: String,
}

#[derive(Args)]
pub struct BackendArgs {
    /// Static host inventory (TOML) used as the cloud backend.
    #[arg(long)]
    pub inventory: PathBuf,

    /// etcd discovery service endpoint (http://host[:port][/path]).
    #[arg(long, conflicts_with = "discovery_url")]
    pub discovery: Option<String>,

    /// Use this pre-issued discovery URL instead of requesting one.
    #[arg(long)]
    pub discovery_url: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CatalogArg {
    Regions,
    Images,
    Keys,
    Plans,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved values of a blueprint profile as JSON.
    Profile {
        #[command(flatten)]
        blueprint: BlueprintArgs,
    },
    /// Print the per-instance topology a create would use.
    Plan {
        #[command(flatten)]
        blueprint: BlueprintArgs,
    },
    /// Create every instance of the cluster, then sync membership and mesh.
    Create {
        #[command(flatten)]
        blueprint: BlueprintArgs,
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// Delete every instance of the cluster.
    Delete {
        #[command(flatten)]
        blueprint: BlueprintArgs,
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// Resync membership and mesh across the live instances.
    Update {
        #[command(flatten)]
        blueprint: BlueprintArgs,
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// Add one instance to an existing cluster.
    AddInstance {
        #[command(flatten)]
        blueprint: BlueprintArgs,
        #[command(flatten)]
        backend: BackendArgs,
        /// Join as an etcd proxy instead of a voting member.
        #[arg(long)]
        proxy: bool,
    },
    /// Remove one instance and resync the rest.
    RemoveInstance {
        #[command(flatten)]
        blueprint: BlueprintArgs,
        #[command(flatten)]
        backend: BackendArgs,
        /// Full instance name.
        #[arg(long)]
        name: String,
    },
    /// List a provider catalog.
    Catalog {
        #[arg(value_enum)]
        kind: CatalogArg,
        #[command(flatten)]
        backend: BackendArgs,
    },
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,quark=debug"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let settings = match &cli.settings {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };

    let ctx = OpContext::new().with_call_timeout(settings.fanout.call_timeout());
    let token = ctx.token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            token.cancel();
        }
    });

    match cli.command {
        Commands::Profile { blueprint } => commands::blueprint::profile(&blueprint),
        Commands::Plan { blueprint } => commands::blueprint::plan(&blueprint),
        Commands::Create { blueprint, backend } => {
            commands::lifecycle::create(&ctx, settings, &blueprint, &backend).await
        }
        Commands::Delete { blueprint, backend } => {
            commands::lifecycle::delete(&ctx, settings, &blueprint, &backend).await
        }
        Commands::Update { blueprint, backend } => {
            commands::lifecycle::update(&ctx, settings, &blueprint, &backend).await
        }
        Commands::AddInstance {
            blueprint,
            backend,
            proxy,
        } => commands::lifecycle::add_instance(&ctx, settings, &blueprint, &backend, proxy).await,
        Commands::RemoveInstance {
            blueprint,
            backend,
            name,
        } => {
            commands::lifecycle::remove_instance(&ctx, settings, &blueprint, &backend, &name).await
        }
        Commands::Catalog { kind, backend } => {
            commands::catalog::list(&ctx, settings, kind, &backend).await
        }
    }
}
