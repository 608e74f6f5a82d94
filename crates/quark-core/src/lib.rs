//! quark-core — shared model for the Quark cluster orchestrator.
//!
//! Holds the cluster data model, the error type every crate returns, the
//! operation context that carries cancellation and deadlines, blueprint
//! parsing with profile resolution, runtime settings, and the capability
//! traits through which cloud, DNS, discovery and remote hosts are driven.

pub mod capability;
pub mod config;
pub mod context;
pub mod error;
pub mod options;
pub mod remote;
pub mod settings;
pub mod types;

pub use capability::{CloudProvider, DiscoveryService, DnsProvider, HostConnector, RemoteHost};
pub use config::{Blueprint, Profile, QuarkOptions, Values};
pub use context::OpContext;
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use options::{ClusterOptions, InstanceOptions, RegistryCredentials, VaultEndpoint};
pub use remote::RemoteHostExt;
pub use settings::Settings;
pub use types::*;
