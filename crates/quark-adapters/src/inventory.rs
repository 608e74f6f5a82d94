//! Static inventory: a cloud backend over hosts listed in a TOML file.
//!
//! ```toml
//! [[instance]]
//! id = "1"
//! name = "x7k2ab.alpha.pulcy.com"
//! private-ipv4 = "10.129.0.1"
//! public-ipv4 = "178.62.0.1"
//! vpn-ip = "192.168.35.1"
//! roles = ["core", "load-balancer", "worker"]
//! ```
//!
//! The inventory is read-only: creating or deleting instances fails.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use quark_core::{
    CatalogEntry, CloudProvider, ClusterInfo, ClusterInstance, ClusterInstanceList, Error,
    InstanceOptions, InstanceRoles, OpContext, Result, ResultExt,
};

const NAME: &str = "static-inventory";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct InventoryFile {
    #[serde(default)]
    instance: Vec<Entry>,
    #[serde(default)]
    catalog: Catalog,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Entry {
    id: Option<String>,
    name: String,
    private_ipv4: Option<Ipv4Addr>,
    public_ipv4: Option<Ipv4Addr>,
    public_ipv6: Option<Ipv6Addr>,
    vpn_ip: Option<Ipv4Addr>,
    roles: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct Catalog {
    #[serde(default)]
    regions: Vec<String>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    plans: Vec<String>,
}

fn parse_roles(name: &str, roles: Option<Vec<String>>) -> Result<InstanceRoles> {
    let Some(roles) = roles else {
        return Ok(InstanceRoles::all());
    };
    let mut out = InstanceRoles {
        core: false,
        load_balancer: false,
        worker: false,
    };
    for role in roles {
        match role.as_str() {
            "core" => out.core = true,
            "load-balancer" => out.load_balancer = true,
            "worker" => out.worker = true,
            other => {
                return Err(Error::validation(format!(
                    "instance {name}: unknown role '{other}'"
                )));
            }
        }
    }
    Ok(out)
}

fn entries(names: &[String]) -> Vec<CatalogEntry> {
    names
        .iter()
        .map(|n| CatalogEntry {
            id: n.clone(),
            name: n.clone(),
        })
        .collect()
}

pub struct StaticInventory {
    instances: Vec<ClusterInstance>,
    catalog: Catalog,
}

impl StaticInventory {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading inventory {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing inventory {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: InventoryFile = toml::from_str(content)?;
        let mut instances = Vec::with_capacity(file.instance.len());
        for entry in file.instance {
            if instances.iter().any(|i: &ClusterInstance| i.name == entry.name) {
                return Err(Error::validation(format!(
                    "instance {} listed twice",
                    entry.name
                )));
            }
            let roles = parse_roles(&entry.name, entry.roles)?;
            instances.push(ClusterInstance {
                id: entry.id.unwrap_or_else(|| entry.name.clone()),
                name: entry.name,
                private_ipv4: entry.private_ipv4,
                public_ipv4: entry.public_ipv4,
                public_ipv6: entry.public_ipv6,
                vpn_ip: entry.vpn_ip,
                roles,
            });
        }
        debug!(instances = instances.len(), "inventory loaded");
        Ok(Self {
            instances,
            catalog: file.catalog,
        })
    }
}

#[async_trait]
impl CloudProvider for StaticInventory {
    fn name(&self) -> &str {
        NAME
    }

    async fn create_instance(
        &self,
        _ctx: &OpContext,
        options: &InstanceOptions,
    ) -> Result<ClusterInstance> {
        Err(Error::provider(format!(
            "{NAME} cannot create {}; add it to the inventory file instead",
            options.instance_name()
        )))
    }

    async fn list_instances(
        &self,
        _ctx: &OpContext,
        info: &ClusterInfo,
    ) -> Result<ClusterInstanceList> {
        let suffix = info.instance_suffix();
        Ok(ClusterInstanceList::new(
            self.instances
                .iter()
                .filter(|i| i.name.ends_with(&suffix))
                .cloned()
                .collect(),
        ))
    }

    async fn delete_instance(&self, _ctx: &OpContext, instance: &ClusterInstance) -> Result<()> {
        Err(Error::provider(format!(
            "{NAME} cannot delete {}; remove it from the inventory file instead",
            instance.name
        )))
    }

    async fn list_regions(&self, _ctx: &OpContext) -> Result<Vec<CatalogEntry>> {
        Ok(entries(&self.catalog.regions))
    }

    async fn list_images(&self, _ctx: &OpContext) -> Result<Vec<CatalogEntry>> {
        Ok(entries(&self.catalog.images))
    }

    async fn list_keys(&self, _ctx: &OpContext) -> Result<Vec<CatalogEntry>> {
        Ok(entries(&self.catalog.keys))
    }

    async fn list_plans(&self, _ctx: &OpContext) -> Result<Vec<CatalogEntry>> {
        Ok(entries(&self.catalog.plans))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quark_core::ErrorKind;

    const INVENTORY: &str = r#"
[[instance]]
id = "101"
name = "aaa.alpha.pulcy.com"
private-ipv4 = "10.129.0.1"
public-ipv4 = "178.62.0.1"
vpn-ip = "192.168.35.1"

[[instance]]
name = "bbb.alpha.pulcy.com"
private-ipv4 = "10.129.0.2"
roles = ["worker"]

[[instance]]
name = "ccc.beta.pulcy.com"

[catalog]
regions = ["ams3"]
"#;

    #[tokio::test]
    async fn lists_by_cluster_suffix() {
        let inv = StaticInventory::parse(INVENTORY).unwrap();
        let ctx = OpContext::new();
        let list = inv
            .list_instances(&ctx, &ClusterInfo::new("", "pulcy.com", "alpha"))
            .await
            .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.0[0].id, "101");
        assert!(list.0[0].roles.core);
        assert_eq!(list.0[1].id, "bbb.alpha.pulcy.com");
        assert!(!list.0[1].roles.core && list.0[1].roles.worker);
        assert_eq!(inv.list_regions(&ctx).await.unwrap()[0].name, "ams3");
    }

    #[tokio::test]
    async fn mutations_are_rejected() {
        let inv = StaticInventory::parse(INVENTORY).unwrap();
        let ctx = OpContext::new();
        let list = inv
            .list_instances(&ctx, &ClusterInfo::new("", "pulcy.com", "alpha"))
            .await
            .unwrap();
        let err = inv.delete_instance(&ctx, &list.0[0]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provider);
        assert!(err.to_string().contains(NAME));
    }

    #[test]
    fn unknown_role_and_duplicates_rejected() {
        let bad = "[[instance]]\nname = \"a.x.y\"\nroles = [\"boss\"]\n";
        assert_eq!(
            StaticInventory::parse(bad).err().map(|e| e.kind()),
            Some(ErrorKind::Validation)
        );
        let dup = "[[instance]]\nname = \"a.x.y\"\n[[instance]]\nname = \"a.x.y\"\n";
        assert!(StaticInventory::parse(dup).is_err());
    }
}
