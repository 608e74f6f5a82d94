//! Cluster-level and per-instance provisioning options.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::config::{Blueprint, KEY_DOMAIN, KEY_INSTANCE_COUNT, KEY_NAME, Values};
use crate::error::{Error, Result, ResultExt};
use crate::types::{ClusterInfo, ClusterInstanceInfo, InstanceRoles};

/// Credentials for the container registry instances pull from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Where instances find the secret store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEndpoint {
    pub address: String,
    pub ca_cert: String,
}

/// Options shared by every instance of a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterOptions {
    pub info: ClusterInfo,
    pub tunnel: String,
    pub instance_count: u32,
    pub image: String,
    pub region: String,
    pub instance_type: String,
    pub ssh_key_names: Vec<String>,
    pub ssh_key_github_account: String,
    pub registry: RegistryCredentials,
    pub vault: VaultEndpoint,
    pub gluon_image: String,
    pub rebooting_strategy: String,
    pub private_network: bool,
    /// Mesh VPN network; must be an IPv4 /24 when set.
    pub vpn_network: Option<Ipv4Network>,
    /// Resolved values without a dedicated field.
    pub extra: Values,
}

impl ClusterOptions {
    /// Build cluster options from a blueprint and a resolved profile.
    pub fn from_blueprint(blueprint: &Blueprint, profile: &str) -> Result<Self> {
        let mut values = blueprint
            .resolve_profile(profile)
            .with_context(|| format!("resolving profile '{profile}'"))?;
        // Blueprint fields win over same-named values.
        if let Some(network) = &blueprint.network {
            values.insert("vpn-network".to_string(), toml::Value::String(network.clone()));
        }
        values.insert("tunnel".to_string(), toml::Value::String(blueprint.tunnel.clone()));
        Self::from_values(values)
    }

    /// Build cluster options from a resolved mapping. The mapping must hold
    /// the reserved `domain`, `name` and `instance-count` keys.
    pub fn from_values(mut values: Values) -> Result<Self> {
        let domain = take_string(&mut values, KEY_DOMAIN)?.unwrap_or_default();
        let name = take_string(&mut values, KEY_NAME)?.unwrap_or_default();
        let id = take_string(&mut values, "id")?.unwrap_or_default();
        let info = ClusterInfo::new(id, domain, name);
        info.validate()?;

        let instance_count = match values.remove(KEY_INSTANCE_COUNT) {
            Some(toml::Value::Integer(n)) if n > 0 => u32::try_from(n)
                .map_err(|_| Error::validation(format!("instance-count {n} is too large")))?,
            Some(other) => {
                return Err(Error::validation(format!(
                    "instance-count must be a positive integer, got {other}"
                )));
            }
            None => return Err(Error::validation("instance-count must be set")),
        };

        let tunnel = take_string(&mut values, "tunnel")?.unwrap_or_else(|| info.cluster_name());

        let vpn_network = match take_string(&mut values, "vpn-network")? {
            Some(cidr) if !cidr.is_empty() => Some(parse_vpn_network(&cidr)?),
            _ => None,
        };

        Ok(Self {
            tunnel,
            instance_count,
            image: take_string(&mut values, "image")?.unwrap_or_default(),
            region: take_string(&mut values, "region")?.unwrap_or_default(),
            instance_type: take_string(&mut values, "instance-type")?.unwrap_or_default(),
            ssh_key_names: take_string_list(&mut values, "ssh-keys")?,
            ssh_key_github_account: take_string(&mut values, "ssh-key-github")?
                .unwrap_or_default(),
            registry: RegistryCredentials {
                url: take_string(&mut values, "registry-url")?.unwrap_or_default(),
                username: take_string(&mut values, "registry-username")?.unwrap_or_default(),
                password: take_string(&mut values, "registry-password")?.unwrap_or_default(),
            },
            vault: VaultEndpoint {
                address: take_string(&mut values, "vault-address")?.unwrap_or_default(),
                ca_cert: take_string(&mut values, "vault-cacert")?.unwrap_or_default(),
            },
            gluon_image: take_string(&mut values, "gluon-image")?.unwrap_or_default(),
            rebooting_strategy: take_string(&mut values, "rebooting-strategy")?
                .unwrap_or_default(),
            private_network: take_bool(&mut values, "private-network")?.unwrap_or(false),
            vpn_network,
            info,
            extra: values,
        })
    }
}

/// Options for creating one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceOptions {
    pub instance: ClusterInstanceInfo,
    /// 1-based index within the cluster.
    pub index: u32,
    pub roles: InstanceRoles,
    pub vpn_ip: Option<Ipv4Addr>,
    /// Shared etcd bootstrap URL; empty until the orchestrator sets it.
    pub etcd_discovery_url: String,
    pub tunnel: String,
    pub image: String,
    pub region: String,
    pub instance_type: String,
    pub ssh_key_names: Vec<String>,
    pub ssh_key_github_account: String,
    pub registry: RegistryCredentials,
    pub vault: VaultEndpoint,
    pub gluon_image: String,
    pub rebooting_strategy: String,
    pub private_network: bool,
    pub extra: BTreeMap<String, toml::Value>,
}

impl InstanceOptions {
    pub fn instance_name(&self) -> String {
        self.instance.instance_name()
    }

    pub fn cluster_name(&self) -> String {
        self.instance.cluster.cluster_name()
    }
}

/// Parse a VPN network; only IPv4 networks with a /24 prefix are accepted.
pub fn parse_vpn_network(cidr: &str) -> Result<Ipv4Network> {
    let network: Ipv4Network = cidr.parse().map_err(|e| {
        Error::with_source(
            crate::ErrorKind::Validation,
            format!("vpn network '{cidr}' is not an IPv4 network"),
            e,
        )
    })?;
    if network.prefix() != 24 {
        return Err(Error::validation(format!(
            "vpn network '{cidr}' must have a /24 prefix, got /{}",
            network.prefix()
        )));
    }
    Ok(network)
}

fn take_string(values: &mut Values, key: &str) -> Result<Option<String>> {
    match values.remove(key) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(Error::validation(format!(
            "{key} must be a string, got {}",
            other.type_str()
        ))),
    }
}

fn take_bool(values: &mut Values, key: &str) -> Result<Option<bool>> {
    match values.remove(key) {
        None => Ok(None),
        Some(toml::Value::Boolean(b)) => Ok(Some(b)),
        Some(other) => Err(Error::validation(format!(
            "{key} must be a boolean, got {}",
            other.type_str()
        ))),
    }
}

/// Accepts an array of strings or a comma-separated string.
fn take_string_list(values: &mut Values, key: &str) -> Result<Vec<String>> {
    match values.remove(key) {
        None => Ok(Vec::new()),
        Some(toml::Value::String(s)) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()),
        Some(toml::Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                toml::Value::String(s) => Ok(s),
                other => Err(Error::validation(format!(
                    "{key} entries must be strings, got {}",
                    other.type_str()
                ))),
            })
            .collect(),
        Some(other) => Err(Error::validation(format!(
            "{key} must be a string or array, got {}",
            other.type_str()
        ))),
    }
}
