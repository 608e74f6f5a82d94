//! Topology assigner — per-instance options from cluster options.
//!
//! The prefix set is generated lazily on first use and cached for the
//! assigner's lifetime, so repeated calls for one index agree.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use tracing::debug;

use quark_core::{
    ClusterInstanceInfo, ClusterInstanceList, ClusterOptions, Error, InstanceOptions,
    InstanceRoles, Result,
};

use crate::prefixes::{InstancePrefixes, random_token};
use crate::vpn::{MAX_INDEX, vpn_address, vpn_index};

pub struct TopologyAssigner {
    options: ClusterOptions,
    prefixes: OnceLock<InstancePrefixes>,
}

impl TopologyAssigner {
    pub fn new(options: ClusterOptions) -> Self {
        Self {
            options,
            prefixes: OnceLock::new(),
        }
    }

    /// Use a fixed prefix set instead of generating one.
    pub fn with_prefixes(options: ClusterOptions, prefixes: InstancePrefixes) -> Result<Self> {
        if prefixes.len() < options.instance_count as usize {
            return Err(Error::validation(format!(
                "{} prefixes supplied for {} instances",
                prefixes.len(),
                options.instance_count
            )));
        }
        Ok(Self {
            options,
            prefixes: OnceLock::from(prefixes),
        })
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    pub fn prefixes(&self) -> &InstancePrefixes {
        self.prefixes.get_or_init(|| {
            let prefixes =
                InstancePrefixes::generate(self.options.instance_count as usize, &mut rand::rng());
            debug!(
                cluster = %self.options.info,
                prefixes = ?prefixes.as_slice(),
                "instance prefixes generated"
            );
            prefixes
        })
    }

    /// Options for the instance at 1-based `index`.
    pub fn instance_options(&self, index: u32, roles: InstanceRoles) -> Result<InstanceOptions> {
        if index == 0 || index > self.options.instance_count {
            return Err(Error::validation(format!(
                "instance index {index} is outside 1..={}",
                self.options.instance_count
            )));
        }
        let prefix = self.prefixes().get(index)?.to_string();
        self.build(index, prefix, roles)
    }

    /// Options for every instance `1..=instance_count`, all with `roles`.
    pub fn plan(&self, roles: InstanceRoles) -> Result<Vec<InstanceOptions>> {
        (1..=self.options.instance_count)
            .map(|i| self.instance_options(i, roles))
            .collect()
    }

    /// Options for one more instance next to `existing`: the lowest free
    /// VPN index (or `len + 1` without a VPN) and a prefix no existing
    /// instance uses.
    pub fn next_instance(
        &self,
        existing: &ClusterInstanceList,
        roles: InstanceRoles,
    ) -> Result<InstanceOptions> {
        let index = match &self.options.vpn_network {
            Some(network) => {
                let used: BTreeSet<u32> = existing
                    .iter()
                    .filter_map(|i| i.vpn_ip.and_then(|ip| vpn_index(network, ip)))
                    .collect();
                (1..=MAX_INDEX)
                    .find(|i| !used.contains(i))
                    .ok_or_else(|| Error::validation(format!("vpn network {network} is full")))?
            }
            None => existing.len() as u32 + 1,
        };

        let suffix = self.options.info.instance_suffix();
        let used: BTreeSet<&str> = existing
            .iter()
            .filter_map(|i| i.name.strip_suffix(&suffix))
            .collect();
        let mut rng = rand::rng();
        let prefix = loop {
            let token = random_token(&mut rng);
            if !used.contains(token.as_str()) {
                break token;
            }
        };

        self.build(index, prefix, roles)
    }

    fn build(&self, index: u32, prefix: String, roles: InstanceRoles) -> Result<InstanceOptions> {
        let vpn_ip: Option<Ipv4Addr> = match &self.options.vpn_network {
            Some(network) => Some(vpn_address(network, index)?),
            None => None,
        };
        let o = &self.options;
        Ok(InstanceOptions {
            instance: ClusterInstanceInfo {
                cluster: o.info.clone(),
                prefix,
            },
            index,
            roles,
            vpn_ip,
            etcd_discovery_url: String::new(),
            tunnel: o.tunnel.clone(),
            image: o.image.clone(),
            region: o.region.clone(),
            instance_type: o.instance_type.clone(),
            ssh_key_names: o.ssh_key_names.clone(),
            ssh_key_github_account: o.ssh_key_github_account.clone(),
            registry: o.registry.clone(),
            vault: o.vault.clone(),
            gluon_image: o.gluon_image.clone(),
            rebooting_strategy: o.rebooting_strategy.clone(),
            private_network: o.private_network,
            extra: o.extra.clone(),
        })
    }
}
