//! quark-adapters — concrete backends for the Quark capability traits.
//!
//! - [`SshConnector`]: remote hosts over the system `ssh` client
//! - [`StaticInventory`]: a cloud backend reading hosts from a TOML file
//! - [`LoggingDns`]: a DNS backend that only logs
//! - [`HttpDiscovery`] / [`StaticDiscovery`]: etcd discovery URLs

pub mod discovery;
pub mod dns;
pub mod inventory;
pub mod ssh;

pub use discovery::{HttpDiscovery, StaticDiscovery};
pub use dns::LoggingDns;
pub use inventory::StaticInventory;
pub use ssh::{SshConnector, SshSession};
