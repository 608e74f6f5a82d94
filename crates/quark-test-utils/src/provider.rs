use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use quark_core::{
    CatalogEntry, CloudProvider, ClusterInfo, ClusterInstance, ClusterInstanceList, Error,
    InstanceOptions, OpContext, Result,
};

use crate::hosts::FakeHosts;

#[derive(Default)]
struct ProviderState {
    hosts: Option<FakeHosts>,
    created: Vec<InstanceOptions>,
    live: Vec<ClusterInstance>,
    fail_create_index: HashSet<u32>,
    fail_delete: HashSet<String>,
    delete_attempts: Vec<String>,
    next_id: u32,
}

/// Cloud backend that keeps instances in memory.
///
/// Created instance `n` (counting from 1 across the fake's lifetime) gets
/// private address `10.129.0.n` and public address `178.62.0.n`.
#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn provider(&self) -> Arc<dyn CloudProvider> {
        Arc::new(self.clone())
    }

    /// Give every created instance a host in `hosts`.
    pub fn attach_hosts(&self, hosts: &FakeHosts) {
        self.lock().hosts = Some(hosts.clone());
    }

    /// Fail creation of the instance with 1-based topology index `index`.
    pub fn fail_create_index(&self, index: u32) {
        self.lock().fail_create_index.insert(index);
    }

    pub fn fail_delete_of(&self, name: &str) {
        self.lock().fail_delete.insert(name.to_string());
    }

    /// Options of every create attempt, failed ones included.
    pub fn created(&self) -> Vec<InstanceOptions> {
        self.lock().created.clone()
    }

    pub fn delete_attempts(&self) -> Vec<String> {
        self.lock().delete_attempts.clone()
    }

    pub fn live(&self) -> ClusterInstanceList {
        ClusterInstanceList::new(self.lock().live.clone())
    }

    fn catalog(kind: &str, names: &[&str]) -> Vec<CatalogEntry> {
        names
            .iter()
            .map(|n| CatalogEntry {
                id: format!("{kind}-{n}"),
                name: n.to_string(),
            })
            .collect()
    }
}

/// Private and public address of the `n`-th created instance.
fn addresses(n: u32) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let octet = u8::try_from(n)
        .ok()
        .filter(|o| *o > 0)
        .ok_or_else(|| Error::provider(format!("fake: no address left for instance {n}")))?;
    Ok((Ipv4Addr::new(10, 129, 0, octet), Ipv4Addr::new(178, 62, 0, octet)))
}

#[async_trait]
impl CloudProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create_instance(
        &self,
        _ctx: &OpContext,
        options: &InstanceOptions,
    ) -> Result<ClusterInstance> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.created.push(options.clone());
        if state.fail_create_index.contains(&options.index) {
            return Err(Error::provider(format!(
                "fake: quota exceeded creating {}",
                options.instance_name()
            )));
        }

        state.next_id += 1;
        let n = state.next_id;
        let (private, public) = addresses(n)?;
        let instance = ClusterInstance {
            id: n.to_string(),
            name: options.instance_name(),
            private_ipv4: Some(private),
            public_ipv4: Some(public),
            public_ipv6: None,
            vpn_ip: options.vpn_ip,
            roles: options.roles,
        };
        if let Some(hosts) = &state.hosts {
            hosts.provision(&instance, &options.etcd_discovery_url);
        }
        state.live.push(instance.clone());
        Ok(instance)
    }

    async fn list_instances(
        &self,
        _ctx: &OpContext,
        info: &ClusterInfo,
    ) -> Result<ClusterInstanceList> {
        let suffix = info.instance_suffix();
        let live = self
            .lock()
            .live
            .iter()
            .filter(|i| i.name.ends_with(&suffix))
            .cloned()
            .collect();
        Ok(ClusterInstanceList::new(live))
    }

    async fn delete_instance(&self, _ctx: &OpContext, instance: &ClusterInstance) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.delete_attempts.push(instance.name.clone());
        if state.fail_delete.contains(&instance.name) {
            return Err(Error::provider(format!("fake: cannot delete {}", instance.name)));
        }
        state.live.retain(|i| i.name != instance.name);
        if let Some(hosts) = &state.hosts {
            hosts.remove(&instance.name);
        }
        Ok(())
    }

    async fn list_regions(&self, _ctx: &OpContext) -> Result<Vec<CatalogEntry>> {
        Ok(Self::catalog("region", &["ams3", "fra1"]))
    }

    async fn list_images(&self, _ctx: &OpContext) -> Result<Vec<CatalogEntry>> {
        Ok(Self::catalog("image", &["coreos-stable", "coreos-beta"]))
    }

    async fn list_keys(&self, _ctx: &OpContext) -> Result<Vec<CatalogEntry>> {
        Ok(Self::catalog("key", &["ops"]))
    }

    async fn list_plans(&self, _ctx: &OpContext) -> Result<Vec<CatalogEntry>> {
        Ok(Self::catalog("plan", &["2gb", "4gb"]))
    }
}
