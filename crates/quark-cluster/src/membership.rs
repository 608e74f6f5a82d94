//! Etcd membership synchronizer. Keeps the peer ledger on every host.
//!
//! The ledger is rebuilt from scratch on each call: machine ids are read
//! from every live instance, rendered into the members file, and pushed
//! back to every instance with a restart of the consuming service. Each
//! step is its own fan-out; a failure on any instance fails the call.

use std::sync::Arc;

use tracing::{debug, info};

use quark_core::remote::shell_quote;
use quark_core::settings::MembershipSettings;
use quark_core::{
    ClusterInstance, ClusterInstanceList, ClusterMember, ClusterMemberList, Error, HostConnector,
    OpContext, RemoteHostExt, Result, ResultExt,
};

use crate::fanout::{FanOut, FanOutReport};

/// Decides which instances are etcd proxies (listed, but not voters).
pub type ProxyPredicate = Arc<dyn Fn(&ClusterInstance) -> bool + Send + Sync>;

/// Every instance without the core role is a proxy.
pub fn default_proxy_predicate() -> ProxyPredicate {
    Arc::new(|instance: &ClusterInstance| !instance.roles.core)
}

/// Ledger entry for `instance` with the given machine id.
pub fn member_for_instance(
    instance: &ClusterInstance,
    machine_id: String,
    etcd_proxy: bool,
) -> Result<ClusterMember> {
    let private_ip = instance.require_cluster_ip()?;
    let private_host_ip = match (instance.vpn_ip, instance.private_ipv4) {
        (Some(_), Some(host)) if host != private_ip => Some(host),
        _ => None,
    };
    Ok(ClusterMember {
        machine_id,
        private_ip,
        etcd_proxy,
        private_host_ip,
    })
}

pub struct MemberSync {
    hosts: Arc<dyn HostConnector>,
    settings: MembershipSettings,
    parallelism: usize,
    is_proxy: ProxyPredicate,
}

impl MemberSync {
    pub fn new(hosts: Arc<dyn HostConnector>, settings: MembershipSettings) -> Self {
        Self {
            hosts,
            settings,
            parallelism: crate::fanout::DEFAULT_MAX_PARALLELISM,
            is_proxy: default_proxy_predicate(),
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_proxy_predicate(mut self, is_proxy: ProxyPredicate) -> Self {
        self.is_proxy = is_proxy;
        self
    }

    pub fn settings(&self) -> &MembershipSettings {
        &self.settings
    }

    /// Read every instance's machine id; one outcome per instance.
    pub async fn collect_report(
        &self,
        ctx: &OpContext,
        instances: &ClusterInstanceList,
    ) -> FanOutReport<ClusterMember> {
        let mut fanout = FanOut::with_parallelism(self.parallelism);
        for instance in instances {
            let hosts = Arc::clone(&self.hosts);
            let is_proxy = Arc::clone(&self.is_proxy);
            let ctx = ctx.child();
            let instance = instance.clone();
            fanout.spawn(instance.name.clone(), async move {
                let host = ctx
                    .run("connect", hosts.connect(&ctx, &instance))
                    .await
                    .with_context(|| format!("connecting to {}", instance.name))?;
                let machine_id = host
                    .machine_id(&ctx)
                    .await
                    .with_context(|| format!("reading machine id of {}", instance.name))?;
                debug!(instance = %instance.name, %machine_id, "machine id read");
                member_for_instance(&instance, machine_id, is_proxy(&instance))
            });
        }
        fanout.join().await
    }

    /// Build the member list in `instances` order.
    pub async fn collect(
        &self,
        ctx: &OpContext,
        instances: &ClusterInstanceList,
    ) -> Result<ClusterMemberList> {
        let members = self.collect_report(ctx, instances).await.into_result()?;
        let mut list = ClusterMemberList::new();
        for member in members {
            list.push(member)?;
        }
        Ok(list)
    }

    /// Overwrite the members file on every instance and restart the
    /// consuming service; one outcome per instance.
    pub async fn push_report(
        &self,
        ctx: &OpContext,
        instances: &ClusterInstanceList,
        members: &ClusterMemberList,
    ) -> FanOutReport<()> {
        let content: Arc<str> = members.render().into();
        let mut fanout = FanOut::with_parallelism(self.parallelism);
        for instance in instances {
            let hosts = Arc::clone(&self.hosts);
            let settings = self.settings.clone();
            let content = Arc::clone(&content);
            let ctx = ctx.child();
            let instance = instance.clone();
            fanout.spawn(instance.name.clone(), async move {
                let host = ctx
                    .run("connect", hosts.connect(&ctx, &instance))
                    .await
                    .with_context(|| format!("connecting to {}", instance.name))?;
                host.ensure_dir(&ctx, &settings.config_dir).await?;
                host.write_file(&ctx, &settings.members_path(), &content, 0o644)
                    .await?;
                host.systemctl(&ctx, &format!("restart {}", shell_quote(&settings.service)))
                    .await?;
                debug!(instance = %instance.name, "members file pushed");
                Ok(())
            });
        }
        fanout.join().await
    }

    pub async fn push(
        &self,
        ctx: &OpContext,
        instances: &ClusterInstanceList,
        members: &ClusterMemberList,
    ) -> Result<()> {
        self.push_report(ctx, instances, members)
            .await
            .into_result()
            .map(|_| ())
    }

    /// Full synchronization: collect, render, push.
    pub async fn sync(
        &self,
        ctx: &OpContext,
        instances: &ClusterInstanceList,
    ) -> Result<ClusterMemberList> {
        let members = self
            .collect(ctx, instances)
            .await
            .context("collecting cluster members")?;
        self.push(ctx, instances, &members)
            .await
            .context("pushing cluster members")?;
        info!(
            instances = instances.len(),
            members = members.len(),
            proxies = members.iter().filter(|m| m.etcd_proxy).count(),
            "cluster members synchronized"
        );
        Ok(members)
    }

    /// Register `member` as a new etcd voter, via an existing instance.
    pub async fn add_etcd_member(
        &self,
        ctx: &OpContext,
        via: &ClusterInstance,
        member: &ClusterMember,
    ) -> Result<()> {
        if member.etcd_proxy {
            return Err(Error::validation(format!(
                "{} is an etcd proxy and cannot be added as a voter",
                member.machine_id
            )));
        }
        let host = ctx
            .run("connect", self.hosts.connect(ctx, via))
            .await
            .with_context(|| format!("connecting to {}", via.name))?;
        let command = etcd_member_add_command(member, self.settings.etcd_peer_port);
        host.run(ctx, &command, None)
            .await
            .with_context(|| format!("adding etcd member {}", member.machine_id))?;
        info!(
            via = %via.name,
            machine_id = %member.machine_id,
            ip = %member.private_ip,
            "etcd member added"
        );
        Ok(())
    }
}

pub fn etcd_member_add_command(member: &ClusterMember, peer_port: u16) -> String {
    format!(
        "etcdctl member add {} http://{}:{}",
        shell_quote(&member.machine_id),
        member.private_ip,
        peer_port
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use quark_core::{ErrorKind, InstanceRoles};
    use quark_test_utils::{FakeHosts, instance};

    fn instances(n: u8) -> ClusterInstanceList {
        ClusterInstanceList::new((1..=n).map(|i| instance(i, true)).collect())
    }

    #[test]
    fn member_uses_vpn_address_and_keeps_host_ip() {
        let inst = instance(2, true);
        let m = member_for_instance(&inst, "m2".into(), false).unwrap();
        assert_eq!(m.private_ip, Ipv4Addr::new(192, 168, 35, 2));
        assert_eq!(m.private_host_ip, Some(Ipv4Addr::new(10, 129, 0, 2)));

        let plain = ClusterInstance {
            vpn_ip: None,
            ..instance(3, false)
        };
        let m = member_for_instance(&plain, "m3".into(), true).unwrap();
        assert_eq!(m.private_ip, Ipv4Addr::new(10, 129, 0, 3));
        assert!(m.private_host_ip.is_none());
    }

    #[tokio::test]
    async fn sync_writes_identical_file_everywhere() {
        let hosts = FakeHosts::new();
        let list = instances(3);
        hosts.add_all(&list);
        let sync = MemberSync::new(hosts.connector(), MembershipSettings::default());

        let members = sync.sync(&OpContext::new(), &list).await.unwrap();
        assert_eq!(members.len(), 3);

        let expected = members.render();
        for inst in &list {
            let host = hosts.host(&inst.name);
            assert_eq!(host.file("/etc/pulcy/cluster-members").unwrap(), expected);
            assert!(host.has_dir("/etc/pulcy"));
            assert!(host.commands().iter().any(|c| c == "sudo systemctl restart gluon.service"));
        }
        assert_eq!(expected.lines().count(), 3);
        assert!(expected.starts_with("machine-1=192.168.35.1 private-host-ip=10.129.0.1\n"));
    }

    #[tokio::test]
    async fn proxies_are_flagged() {
        let hosts = FakeHosts::new();
        let mut list = instances(2);
        list.0[1].roles = InstanceRoles::worker();
        hosts.add_all(&list);
        let members = MemberSync::new(hosts.connector(), MembershipSettings::default())
            .collect(&OpContext::new(), &list)
            .await
            .unwrap();
        let flags: Vec<bool> = members.iter().map(|m| m.etcd_proxy).collect();
        assert_eq!(flags, [false, true]);
    }

    #[tokio::test]
    async fn one_failing_host_fails_the_sync() {
        let hosts = FakeHosts::new();
        let list = instances(3);
        hosts.add_all(&list);
        hosts.host(&list.0[1].name).fail_commands_matching("cat /etc/machine-id");

        let sync = MemberSync::new(hosts.connector(), MembershipSettings::default());
        let report = sync.collect_report(&OpContext::new(), &list).await;
        assert_eq!(report.len(), 3);
        assert_eq!(report.errors().len(), 1);

        let err = sync.sync(&OpContext::new(), &list).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert!(hosts.host(&list.0[0].name).file("/etc/pulcy/cluster-members").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_restart_times_out_after_other_hosts_finish() {
        let hosts = FakeHosts::new();
        let list = instances(3);
        hosts.add_all(&list);
        hosts.host(&list.0[1].name).stall_commands_matching("systemctl restart");
        let sync = MemberSync::new(hosts.connector(), MembershipSettings::default());
        let ctx = OpContext::new().with_call_timeout(Duration::from_secs(30));

        let err = sync.sync(&ctx, &list).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        for i in [0, 2] {
            let host = hosts.host(&list.0[i].name);
            assert!(host.file("/etc/pulcy/cluster-members").is_some());
            assert!(host.commands().iter().any(|c| c == "sudo systemctl restart gluon.service"));
        }
        let stalled = hosts.host(&list.0[1].name);
        assert!(stalled.file("/etc/pulcy/cluster-members").is_some());
        assert!(!stalled.commands().iter().any(|c| c.contains("systemctl restart")));
    }

    #[tokio::test]
    async fn etcd_member_add_runs_on_existing_instance() {
        let hosts = FakeHosts::new();
        let list = instances(2);
        hosts.add_all(&list);
        let sync = MemberSync::new(hosts.connector(), MembershipSettings::default());
        let member = member_for_instance(&list.0[1], "machine-2".into(), false).unwrap();

        sync.add_etcd_member(&OpContext::new(), &list.0[0], &member)
            .await
            .unwrap();
        assert!(hosts
            .host(&list.0[0].name)
            .commands()
            .contains(&"etcdctl member add machine-2 http://192.168.35.2:2380".to_string()));
    }

    #[tokio::test]
    async fn proxies_cannot_be_added_as_voters() {
        let hosts = FakeHosts::new();
        let list = instances(1);
        hosts.add_all(&list);
        let sync = MemberSync::new(hosts.connector(), MembershipSettings::default());
        let member = member_for_instance(&list.0[0], "machine-1".into(), true).unwrap();
        let err = sync
            .add_etcd_member(&OpContext::new(), &list.0[0], &member)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
