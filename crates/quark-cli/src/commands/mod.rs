pub mod blueprint;
pub mod catalog;
pub mod lifecycle;

use std::sync::Arc;

use quark_adapters::{HttpDiscovery, LoggingDns, SshConnector, StaticDiscovery, StaticInventory};
use quark_cluster::Orchestrator;
use quark_core::{DiscoveryService, Error, Settings};

use crate::BackendArgs;

/// Wire the orchestrator to the backends named on the command line.
pub fn orchestrator(settings: Settings, backend: &BackendArgs) -> anyhow::Result<Orchestrator> {
    let provider = Arc::new(StaticInventory::from_file(&backend.inventory)?);
    let discovery: Arc<dyn DiscoveryService> = match (&backend.discovery, &backend.discovery_url) {
        (Some(endpoint), _) => Arc::new(HttpDiscovery::new(endpoint)?),
        (None, Some(url)) => Arc::new(StaticDiscovery::new(url.clone())),
        (None, None) => Arc::new(Unconfigured),
    };
    let hosts = Arc::new(SshConnector::new(settings.ssh.clone()));
    Ok(Orchestrator::new(
        provider,
        Arc::new(LoggingDns),
        hosts,
        discovery,
        settings,
    ))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Discovery when neither `--discovery` nor `--discovery-url` was given.
struct Unconfigured;

#[async_trait::async_trait]
impl DiscoveryService for Unconfigured {
    async fn new_discovery_url(
        &self,
        _ctx: &quark_core::OpContext,
        _size: u32,
    ) -> quark_core::Result<String> {
        Err(Error::validation(
            "no etcd discovery configured; pass --discovery or --discovery-url",
        ))
    }
}
