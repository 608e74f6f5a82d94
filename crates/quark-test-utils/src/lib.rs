//! In-memory fakes for every Quark capability.
//!
//! - [`FakeHosts`] / [`FakeHost`]: remote hosts with a simulated
//!   filesystem that understands the commands `RemoteHostExt` issues
//! - [`FakeProvider`]: a cloud backend that records every call and can be
//!   told to fail selected creates or deletes
//! - [`FakeDns`]: a record store
//! - [`FakeDiscovery`]: a fixed discovery URL

mod discovery;
mod dns;
mod hosts;
mod provider;

use std::net::Ipv4Addr;

use quark_core::{ClusterInstance, InstanceRoles};

pub use discovery::FakeDiscovery;
pub use dns::FakeDns;
pub use hosts::{FakeHost, FakeHosts};
pub use provider::FakeProvider;

/// A core instance of `alpha.pulcy.com` numbered `i`: private address
/// `10.129.0.i`, public `178.62.0.i` and, with `vpn`, `192.168.35.i`.
pub fn instance(i: u8, vpn: bool) -> ClusterInstance {
    ClusterInstance {
        id: i.to_string(),
        name: format!("host{i}.alpha.pulcy.com"),
        private_ipv4: Some(Ipv4Addr::new(10, 129, 0, i)),
        public_ipv4: Some(Ipv4Addr::new(178, 62, 0, i)),
        public_ipv6: None,
        vpn_ip: vpn.then(|| Ipv4Addr::new(192, 168, 35, i)),
        roles: InstanceRoles::all(),
    }
}
