//! Shared types used across Quark crates.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ── Cluster identity ───────────────────────────────────────────────

/// Identity of a cluster. `name` + `domain` form its DNS namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Opaque identifier used by secret-management integration.
    pub id: String,
    pub domain: String,
    pub name: String,
}

impl ClusterInfo {
    pub fn new(id: impl Into<String>, domain: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            domain: domain.into(),
            name: name.into(),
        }
    }

    /// `<name>.<domain>`
    pub fn cluster_name(&self) -> String {
        format!("{}.{}", self.name, self.domain)
    }

    /// Suffix shared by every instance name of this cluster: `.<name>.<domain>`.
    pub fn instance_suffix(&self) -> String {
        format!(".{}", self.cluster_name())
    }

    pub fn validate(&self) -> Result<()> {
        if self.domain.is_empty() {
            return Err(Error::validation("cluster domain must be set"));
        }
        if self.name.is_empty() {
            return Err(Error::validation("cluster name must be set"));
        }
        Ok(())
    }
}

impl fmt::Display for ClusterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cluster_name())
    }
}

/// Identity of one instance: `<prefix>.<name>.<domain>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterInstanceInfo {
    #[serde(flatten)]
    pub cluster: ClusterInfo,
    pub prefix: String,
}

impl ClusterInstanceInfo {
    pub fn instance_name(&self) -> String {
        format!("{}.{}", self.prefix, self.cluster.cluster_name())
    }
}

// ── Instances ──────────────────────────────────────────────────────

/// Role flags of an instance. Caller-supplied, never derived; an
/// instance listed without roles is a full member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceRoles {
    pub core: bool,
    pub load_balancer: bool,
    pub worker: bool,
}

impl Default for InstanceRoles {
    fn default() -> Self {
        Self::all()
    }
}

impl InstanceRoles {
    /// Full etcd voter that also fronts traffic and runs workloads.
    pub fn all() -> Self {
        Self {
            core: true,
            load_balancer: true,
            worker: true,
        }
    }

    pub fn worker() -> Self {
        Self {
            core: false,
            load_balancer: false,
            worker: true,
        }
    }
}

/// A provisioned compute node as reported by a cloud backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInstance {
    /// Provider-specific id.
    pub id: String,
    pub name: String,
    pub private_ipv4: Option<Ipv4Addr>,
    pub public_ipv4: Option<Ipv4Addr>,
    pub public_ipv6: Option<Ipv6Addr>,
    /// Static address on the mesh VPN, when the cluster has one.
    pub vpn_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub roles: InstanceRoles,
}

impl ClusterInstance {
    /// Address used for cluster-internal traffic: VPN address when
    /// present, otherwise the provider's private address.
    pub fn cluster_ip(&self) -> Option<Ipv4Addr> {
        self.vpn_ip.or(self.private_ipv4)
    }

    /// Address the remote-command transport connects to.
    pub fn ssh_address(&self) -> Option<String> {
        self.public_ipv4
            .map(|ip| ip.to_string())
            .or_else(|| self.public_ipv6.map(|ip| ip.to_string()))
            .or_else(|| self.private_ipv4.map(|ip| ip.to_string()))
    }

    /// Mesh node name: the private IPv4 address (or the instance name when
    /// there is none) with every non-alphanumeric replaced by `_`.
    pub fn tinc_name(&self) -> String {
        let base = match self.private_ipv4 {
            Some(ip) => ip.to_string(),
            None => self.name.clone(),
        };
        base.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    pub fn require_private_ipv4(&self) -> Result<Ipv4Addr> {
        self.private_ipv4.ok_or_else(|| {
            Error::validation(format!("instance {} has no private IPv4 address", self.name))
        })
    }

    pub fn require_cluster_ip(&self) -> Result<Ipv4Addr> {
        self.cluster_ip().ok_or_else(|| {
            Error::validation(format!("instance {} has no cluster address", self.name))
        })
    }
}

/// The live instances of a cluster, in the order the backend listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInstanceList(pub Vec<ClusterInstance>);

impl ClusterInstanceList {
    pub fn new(instances: Vec<ClusterInstance>) -> Self {
        Self(instances)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClusterInstance> {
        self.0.iter()
    }

    pub fn find_by_name(&self, name: &str) -> Result<&ClusterInstance> {
        self.0
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::not_found(format!("instance {name} not found")))
    }

    pub fn find_by_cluster_ip(&self, ip: Ipv4Addr) -> Result<&ClusterInstance> {
        self.0
            .iter()
            .find(|i| i.cluster_ip() == Some(ip))
            .ok_or_else(|| Error::not_found(format!("no instance with cluster address {ip}")))
    }

    /// Every instance except the one named `name`.
    pub fn except(&self, name: &str) -> ClusterInstanceList {
        ClusterInstanceList(self.0.iter().filter(|i| i.name != name).cloned().collect())
    }

    pub fn sorted_by_name(&self) -> ClusterInstanceList {
        let mut v = self.0.clone();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        ClusterInstanceList(v)
    }
}

impl IntoIterator for ClusterInstanceList {
    type Item = ClusterInstance;
    type IntoIter = std::vec::IntoIter<ClusterInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClusterInstanceList {
    type Item = &'a ClusterInstance;
    type IntoIter = std::slice::Iter<'a, ClusterInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ── Etcd membership ────────────────────────────────────────────────

/// One node's entry in the etcd peer ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    /// Durable per-host identifier, read from the host.
    pub machine_id: String,
    /// Cluster address (VPN address when the mesh is in use).
    pub private_ip: Ipv4Addr,
    pub etcd_proxy: bool,
    /// Provider private address, when it differs from `private_ip`.
    pub private_host_ip: Option<Ipv4Addr>,
}

impl ClusterMember {
    /// `machineID=privateAddress[ etcd-proxy][ private-host-ip=<addr>]`
    pub fn render(&self) -> String {
        let mut line = format!("{}={}", self.machine_id, self.private_ip);
        if self.etcd_proxy {
            line.push_str(" etcd-proxy");
        }
        if let Some(host_ip) = self.private_host_ip {
            line.push_str(&format!(" private-host-ip={host_ip}"));
        }
        line
    }
}

/// Ordered peer ledger; at most one member per machine id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMemberList(Vec<ClusterMember>);

impl ClusterMemberList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a member. A second member with an already-listed machine id
    /// is rejected.
    pub fn push(&mut self, member: ClusterMember) -> Result<()> {
        if self.0.iter().any(|m| m.machine_id == member.machine_id) {
            return Err(Error::validation(format!(
                "duplicate machine id {} in member list",
                member.machine_id
            )));
        }
        self.0.push(member);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClusterMember> {
        self.0.iter()
    }

    /// Look a member up by its cluster address or private host address.
    pub fn find(&self, address: Ipv4Addr) -> Result<&ClusterMember> {
        self.0
            .iter()
            .find(|m| m.private_ip == address || m.private_host_ip == Some(address))
            .ok_or_else(|| Error::not_found(format!("no cluster member with address {address}")))
    }

    /// Render the membership file, one line per member, in list order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for member in &self.0 {
            out.push_str(&member.render());
            out.push('\n');
        }
        out
    }
}

// ── DNS & catalog ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    A,
    #[serde(rename = "AAAA")]
    Aaaa,
    #[serde(rename = "CNAME")]
    Cname,
    #[serde(rename = "TXT")]
    Txt,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Txt => "TXT",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A DNS record, `name` fully qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DnsRecord {
    pub record_type: RecordType,
    pub name: String,
    pub value: String,
}

/// One entry of a provider catalog (region, image, key or plan).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, ip: [u8; 4], proxy: bool, host: Option<[u8; 4]>) -> ClusterMember {
        ClusterMember {
            machine_id: id.to_string(),
            private_ip: Ipv4Addr::from(ip),
            etcd_proxy: proxy,
            private_host_ip: host.map(Ipv4Addr::from),
        }
    }

    #[test]
    fn member_line_format() {
        assert_eq!(member("m1", [10, 0, 0, 1], false, None).render(), "m1=10.0.0.1");
        assert_eq!(
            member("m2", [192, 168, 35, 2], true, Some([10, 129, 0, 7])).render(),
            "m2=192.168.35.2 etcd-proxy private-host-ip=10.129.0.7"
        );
    }

    #[test]
    fn member_list_rejects_duplicate_machine_id() {
        let mut list = ClusterMemberList::new();
        list.push(member("m1", [10, 0, 0, 1], false, None)).unwrap();
        let err = list.push(member("m1", [10, 0, 0, 2], false, None)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn member_list_find_by_either_address() {
        let mut list = ClusterMemberList::new();
        list.push(member("m1", [192, 168, 35, 1], false, Some([10, 0, 0, 5])))
            .unwrap();
        assert_eq!(list.find(Ipv4Addr::new(192, 168, 35, 1)).unwrap().machine_id, "m1");
        assert_eq!(list.find(Ipv4Addr::new(10, 0, 0, 5)).unwrap().machine_id, "m1");
        assert!(list.find(Ipv4Addr::new(10, 0, 0, 6)).is_err());
    }

    #[test]
    fn render_keeps_insertion_order() {
        let mut list = ClusterMemberList::new();
        list.push(member("b", [10, 0, 0, 2], false, None)).unwrap();
        list.push(member("a", [10, 0, 0, 1], false, None)).unwrap();
        assert_eq!(list.render(), "b=10.0.0.2\na=10.0.0.1\n");
    }

    #[test]
    fn cluster_ip_prefers_vpn() {
        let mut inst = ClusterInstance {
            id: "1".into(),
            name: "abc.alpha.pulcy.com".into(),
            private_ipv4: Some(Ipv4Addr::new(10, 0, 0, 5)),
            public_ipv4: None,
            public_ipv6: None,
            vpn_ip: None,
            roles: InstanceRoles::all(),
        };
        assert_eq!(inst.cluster_ip(), Some(Ipv4Addr::new(10, 0, 0, 5)));
        inst.vpn_ip = Some(Ipv4Addr::new(192, 168, 35, 1));
        assert_eq!(inst.cluster_ip(), Some(Ipv4Addr::new(192, 168, 35, 1)));
        assert_eq!(inst.tinc_name(), "10_0_0_5");
        inst.private_ipv4 = None;
        assert_eq!(inst.tinc_name(), "abc_alpha_pulcy_com");
    }

    #[test]
    fn instance_naming() {
        let info = ClusterInstanceInfo {
            cluster: ClusterInfo::new("id", "pulcy.com", "alpha"),
            prefix: "x7k2".into(),
        };
        assert_eq!(info.instance_name(), "x7k2.alpha.pulcy.com");
        assert_eq!(info.cluster.instance_suffix(), ".alpha.pulcy.com");
    }
}
