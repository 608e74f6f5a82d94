//! Orchestrator: drives whole-cluster lifecycle operations.
//!
//! The `Orchestrator` composes the capability backends with the topology
//! assigner, the membership synchronizer and the mesh configurator:
//! - `create_cluster` fans out instance creation and DNS registration,
//!   then converges membership and the mesh
//! - `delete_cluster` removes every instance of a cluster
//! - `update_cluster` is the idempotent repair path
//! - `add_instance` / `remove_instance` scale by one instance

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use quark_core::{
    CatalogEntry, CloudProvider, ClusterInfo, ClusterInstance, ClusterInstanceList,
    ClusterMemberList, DiscoveryService, DnsProvider, Error, HostConnector, InstanceOptions,
    InstanceRoles, OpContext, RemoteHostExt, Result, ResultExt, Settings,
};
use quark_topology::TopologyAssigner;

use crate::dns::DnsRegistrar;
use crate::fanout::FanOut;
use crate::membership::{MemberSync, ProxyPredicate, default_proxy_predicate, member_for_instance};
use crate::mesh::{MeshConfigurator, MeshStats};

/// State of a cluster after a lifecycle operation converged it.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub instances: ClusterInstanceList,
    pub members: ClusterMemberList,
    /// `None` when no instance is on the mesh VPN.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh: Option<MeshStats>,
}

/// Provider catalog to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Regions,
    Images,
    Keys,
    Plans,
}

pub struct Orchestrator {
    provider: Arc<dyn CloudProvider>,
    dns: DnsRegistrar,
    hosts: Arc<dyn HostConnector>,
    discovery: Arc<dyn DiscoveryService>,
    settings: Settings,
    is_proxy: ProxyPredicate,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        dns: Arc<dyn DnsProvider>,
        hosts: Arc<dyn HostConnector>,
        discovery: Arc<dyn DiscoveryService>,
        settings: Settings,
    ) -> Self {
        Self {
            provider,
            dns: DnsRegistrar::new(dns),
            hosts,
            discovery,
            settings,
            is_proxy: default_proxy_predicate(),
        }
    }

    /// Override which instances are listed as etcd proxies.
    pub fn with_proxy_predicate(mut self, is_proxy: ProxyPredicate) -> Self {
        self.is_proxy = is_proxy;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn members(&self) -> MemberSync {
        MemberSync::new(Arc::clone(&self.hosts), self.settings.membership.clone())
            .with_parallelism(self.settings.fanout.parallelism)
            .with_proxy_predicate(Arc::clone(&self.is_proxy))
    }

    fn mesh(&self) -> MeshConfigurator {
        MeshConfigurator::new(Arc::clone(&self.hosts), self.settings.mesh.clone())
            .with_parallelism(self.settings.fanout.parallelism)
    }

    /// Create every instance of the cluster, register DNS, then converge
    /// membership and the mesh.
    ///
    /// One discovery URL is fetched and shared by all instances. If any
    /// create task fails the first error is returned once every task has
    /// finished; instances already created are left in place.
    pub async fn create_cluster(
        &self,
        ctx: &OpContext,
        topology: &TopologyAssigner,
        roles: InstanceRoles,
    ) -> Result<ClusterReport> {
        let info = topology.options().info.clone();
        info.validate()?;
        let size = topology.options().instance_count;

        let discovery_url = ctx
            .run("discovery", self.discovery.new_discovery_url(ctx, size))
            .await
            .context("requesting etcd discovery url")?;
        info!(cluster = %info, instances = size, "creating cluster");

        let mut plan = topology.plan(roles)?;
        for options in &mut plan {
            options.etcd_discovery_url = discovery_url.clone();
            self.provider.apply_instance_defaults(options);
        }

        let mut fanout = FanOut::with_parallelism(self.settings.fanout.parallelism);
        for options in plan {
            let provider = Arc::clone(&self.provider);
            let dns = self.dns.clone();
            let info = info.clone();
            let ctx = ctx.child();
            fanout.spawn(options.instance_name(), async move {
                let instance = create_one(&ctx, provider.as_ref(), &options).await?;
                dns.register_instance(&ctx, &info, &instance).await?;
                Ok(instance)
            });
        }
        let instances = ClusterInstanceList::new(
            fanout
                .join()
                .await
                .into_result()
                .with_context(|| format!("creating cluster {info}"))?,
        );

        let report = self.converge(ctx, instances).await?;
        info!(cluster = %info, instances = report.instances.len(), "cluster created");
        Ok(report)
    }

    /// Unregister DNS for and delete every instance of the cluster.
    ///
    /// Best effort: every instance is attempted even when some fail, then
    /// the first failure is returned. Returns the number of deleted
    /// instances.
    pub async fn delete_cluster(&self, ctx: &OpContext, info: &ClusterInfo) -> Result<usize> {
        let instances = self.list(ctx, info).await?;
        if instances.is_empty() {
            warn!(cluster = %info, "no instances found, nothing to delete");
            return Ok(0);
        }
        info!(cluster = %info, instances = instances.len(), "deleting cluster");

        let mut fanout = FanOut::with_parallelism(self.settings.fanout.parallelism);
        for instance in instances {
            let provider = Arc::clone(&self.provider);
            let dns = self.dns.clone();
            let info = info.clone();
            let ctx = ctx.child();
            fanout.spawn(instance.name.clone(), async move {
                dns.unregister_instance(&ctx, &info, &instance).await?;
                delete_one(&ctx, provider.as_ref(), &instance).await
            });
        }
        let report = fanout.join().await;
        let deleted = report.successes().len();
        for (label, err) in report.errors() {
            warn!(instance = %label, error = %err.chain(), "instance deletion failed");
        }
        report
            .into_result()
            .with_context(|| format!("deleting cluster {info}"))?;
        info!(cluster = %info, deleted, "cluster deleted");
        Ok(deleted)
    }

    /// Re-list live instances, then resync membership and the mesh.
    pub async fn update_cluster(
        &self,
        ctx: &OpContext,
        info: &ClusterInfo,
    ) -> Result<ClusterReport> {
        let instances = self.list(ctx, info).await?;
        if instances.is_empty() {
            return Err(Error::not_found(format!("cluster {info} has no instances")));
        }
        let report = self
            .converge(ctx, instances)
            .await
            .with_context(|| format!("updating cluster {info}"))?;
        info!(cluster = %info, instances = report.instances.len(), "cluster updated");
        Ok(report)
    }

    /// Add one instance next to the existing ones.
    ///
    /// The discovery URL is read from an existing instance. A voting
    /// member is announced to etcd through that instance before the
    /// cluster is resynced.
    pub async fn add_instance(
        &self,
        ctx: &OpContext,
        topology: &TopologyAssigner,
        roles: InstanceRoles,
    ) -> Result<ClusterReport> {
        let info = topology.options().info.clone();
        let existing = self.list(ctx, &info).await?;
        let via = pick_existing(&existing, &info)?;

        let via_host = ctx
            .run("connect", self.hosts.connect(ctx, &via))
            .await
            .with_context(|| format!("connecting to {}", via.name))?;
        let discovery_url = via_host
            .etcd_discovery_url(ctx)
            .await
            .with_context(|| format!("reading etcd discovery url from {}", via.name))?;

        let mut options = topology.next_instance(&existing, roles)?;
        options.etcd_discovery_url = discovery_url;
        self.provider.apply_instance_defaults(&mut options);
        info!(
            cluster = %info,
            instance = %options.instance_name(),
            via = %via.name,
            "adding instance"
        );

        let created = create_one(ctx, self.provider.as_ref(), &options).await?;
        self.dns.register_instance(ctx, &info, &created).await?;

        if (self.is_proxy)(&created) {
            info!(instance = %created.name, "instance joins as etcd proxy");
        } else {
            let host = ctx
                .run("connect", self.hosts.connect(ctx, &created))
                .await
                .with_context(|| format!("connecting to {}", created.name))?;
            let machine_id = host.machine_id(ctx).await?;
            let member = member_for_instance(&created, machine_id, false)?;
            self.members().add_etcd_member(ctx, &via, &member).await?;
        }

        self.update_cluster(ctx, &info).await
    }

    /// Remove the named instance and resync the remaining ones.
    pub async fn remove_instance(
        &self,
        ctx: &OpContext,
        info: &ClusterInfo,
        name: &str,
    ) -> Result<ClusterReport> {
        let existing = self.list(ctx, info).await?;
        let victim = existing.find_by_name(name)?.clone();
        if !(self.is_proxy)(&victim) {
            warn!(
                instance = %victim.name,
                "removing an etcd voter without draining it; remove the member from etcd separately"
            );
        }

        self.dns.unregister_instance(ctx, info, &victim).await?;
        delete_one(ctx, self.provider.as_ref(), &victim).await?;
        info!(cluster = %info, instance = %victim.name, "instance removed");

        let remaining = existing.except(name);
        if remaining.is_empty() {
            return Ok(ClusterReport {
                instances: remaining,
                members: ClusterMemberList::new(),
                mesh: None,
            });
        }
        self.converge(ctx, remaining)
            .await
            .with_context(|| format!("updating cluster {info}"))
    }

    pub async fn catalog(&self, ctx: &OpContext, kind: CatalogKind) -> Result<Vec<CatalogEntry>> {
        let p = self.provider.as_ref();
        let entries = match kind {
            CatalogKind::Regions => ctx.run("list regions", p.list_regions(ctx)).await,
            CatalogKind::Images => ctx.run("list images", p.list_images(ctx)).await,
            CatalogKind::Keys => ctx.run("list keys", p.list_keys(ctx)).await,
            CatalogKind::Plans => ctx.run("list plans", p.list_plans(ctx)).await,
        };
        entries.with_context(|| format!("listing {kind:?} from {}", p.name()))
    }

    pub async fn list(&self, ctx: &OpContext, info: &ClusterInfo) -> Result<ClusterInstanceList> {
        ctx.run("list instances", self.provider.list_instances(ctx, info))
            .await
            .with_context(|| format!("listing instances of {info} from {}", self.provider.name()))
    }

    async fn converge(
        &self,
        ctx: &OpContext,
        instances: ClusterInstanceList,
    ) -> Result<ClusterReport> {
        let members = self.members().sync(ctx, &instances).await?;
        let mesh = if MeshConfigurator::wanted(&instances) {
            Some(self.mesh().configure(ctx, &instances).await?)
        } else {
            None
        };
        Ok(ClusterReport {
            instances,
            members,
            mesh,
        })
    }
}

async fn create_one(
    ctx: &OpContext,
    provider: &dyn CloudProvider,
    options: &InstanceOptions,
) -> Result<ClusterInstance> {
    let mut instance = ctx
        .run("create instance", provider.create_instance(ctx, options))
        .await
        .with_context(|| format!("creating {} via {}", options.instance_name(), provider.name()))?;
    // Roles are ours, not the backend's.
    instance.roles = options.roles;
    if instance.vpn_ip.is_none() {
        instance.vpn_ip = options.vpn_ip;
    }
    info!(instance = %instance.name, id = %instance.id, "instance created");
    Ok(instance)
}

async fn delete_one(
    ctx: &OpContext,
    provider: &dyn CloudProvider,
    instance: &ClusterInstance,
) -> Result<()> {
    ctx.run("delete instance", provider.delete_instance(ctx, instance))
        .await
        .with_context(|| format!("deleting {} via {}", instance.name, provider.name()))?;
    info!(instance = %instance.name, "instance deleted");
    Ok(())
}

/// The existing instance that scale-out talks to: the first core
/// instance by name, or the first instance when none is core.
fn pick_existing(existing: &ClusterInstanceList, info: &ClusterInfo) -> Result<ClusterInstance> {
    let sorted = existing.sorted_by_name();
    sorted
        .iter()
        .find(|i| i.roles.core)
        .or_else(|| sorted.iter().next())
        .cloned()
        .ok_or_else(|| Error::not_found(format!("cluster {info} has no instances")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quark_core::{Blueprint, ClusterOptions, ErrorKind};
    use quark_test_utils::{FakeDiscovery, FakeDns, FakeHosts, FakeProvider};

    struct Harness {
        provider: FakeProvider,
        dns: FakeDns,
        hosts: FakeHosts,
        orchestrator: Orchestrator,
    }

    fn harness() -> Harness {
        let provider = FakeProvider::new();
        let dns = FakeDns::new();
        let hosts = FakeHosts::new();
        provider.attach_hosts(&hosts);
        let orchestrator = Orchestrator::new(
            provider.provider(),
            dns.provider(),
            hosts.connector(),
            FakeDiscovery::new("https://discovery.etcd.io/abc").service(),
            Settings::default(),
        );
        Harness {
            provider,
            dns,
            hosts,
            orchestrator,
        }
    }

    fn topology(network: Option<&str>) -> TopologyAssigner {
        let network = network.map(|n| format!("network = \"{n}\"\n")).unwrap_or_default();
        let doc = format!("[cluster.alpha]\ndomain = \"pulcy.com\"\n{network}");
        let bp = Blueprint::parse(&doc).unwrap();
        TopologyAssigner::new(ClusterOptions::from_blueprint(&bp, "").unwrap())
    }

    #[tokio::test]
    async fn create_without_vpn_skips_mesh() {
        let h = harness();
        let report = h
            .orchestrator
            .create_cluster(&OpContext::new(), &topology(None), InstanceRoles::all())
            .await
            .unwrap();
        assert_eq!(report.instances.len(), 3);
        assert_eq!(report.members.len(), 3);
        assert!(report.mesh.is_none());
        assert!(h
            .provider
            .created()
            .iter()
            .all(|o| o.etcd_discovery_url == "https://discovery.etcd.io/abc"));
    }

    #[tokio::test]
    async fn update_of_unknown_cluster_is_not_found() {
        let h = harness();
        let err = h
            .orchestrator
            .update_cluster(&OpContext::new(), &ClusterInfo::new("", "pulcy.com", "beta"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn delete_attempts_every_instance() {
        let h = harness();
        let t = topology(None);
        let ctx = OpContext::new();
        let report = h
            .orchestrator
            .create_cluster(&ctx, &t, InstanceRoles::all())
            .await
            .unwrap();
        let doomed = report.instances.0[0].name.clone();
        h.provider.fail_delete_of(&doomed);

        let err = h
            .orchestrator
            .delete_cluster(&ctx, &t.options().info)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provider);
        assert_eq!(h.provider.delete_attempts().len(), 3);
        assert_eq!(h.provider.live().len(), 1);
        assert!(h.dns.records().is_empty());
    }

    #[tokio::test]
    async fn remove_instance_resyncs_remaining() {
        let h = harness();
        let t = topology(Some("192.168.35.0/24"));
        let ctx = OpContext::new();
        let created = h
            .orchestrator
            .create_cluster(&ctx, &t, InstanceRoles::all())
            .await
            .unwrap();
        let victim = created.instances.0[2].name.clone();

        let report = h
            .orchestrator
            .remove_instance(&ctx, &t.options().info, &victim)
            .await
            .unwrap();
        assert_eq!(report.instances.len(), 2);
        assert_eq!(report.members.len(), 2);
        assert_eq!(report.mesh.unwrap().descriptors_distributed, 2);
        let survivor = h.hosts.host(&created.instances.0[0].name);
        assert_eq!(
            survivor.file("/etc/pulcy/cluster-members").unwrap().lines().count(),
            2
        );
    }

    #[tokio::test]
    async fn catalog_lists_from_provider() {
        let h = harness();
        let regions = h
            .orchestrator
            .catalog(&OpContext::new(), CatalogKind::Regions)
            .await
            .unwrap();
        assert!(!regions.is_empty());
    }
}
