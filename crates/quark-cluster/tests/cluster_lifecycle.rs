//! End-to-end lifecycle tests against in-memory backends.

use std::net::Ipv4Addr;
use std::time::Duration;

use quark_cluster::Orchestrator;
use quark_core::{
    Blueprint, ClusterOptions, ErrorKind, InstanceRoles, OpContext, RecordType, Settings,
};
use quark_test_utils::{FakeDiscovery, FakeDns, FakeHosts, FakeProvider};
use quark_topology::TopologyAssigner;

const MEMBERS: &str = "/etc/pulcy/cluster-members";
const TINC_HOSTS: &str = "/etc/tinc/pulcy/hosts";

struct Fixture {
    provider: FakeProvider,
    dns: FakeDns,
    hosts: FakeHosts,
    discovery: FakeDiscovery,
    orchestrator: Orchestrator,
}

fn fixture() -> Fixture {
    let provider = FakeProvider::new();
    let dns = FakeDns::new();
    let hosts = FakeHosts::new();
    let discovery = FakeDiscovery::new("https://discovery.etcd.io/7f3a");
    provider.attach_hosts(&hosts);
    let orchestrator = Orchestrator::new(
        provider.provider(),
        dns.provider(),
        hosts.connector(),
        discovery.service(),
        Settings::default(),
    );
    Fixture {
        provider,
        dns,
        hosts,
        discovery,
        orchestrator,
    }
}

fn alpha(count: u32, network: Option<&str>) -> TopologyAssigner {
    let network = network.map(|n| format!("network = \"{n}\"\n")).unwrap_or_default();
    let doc = format!(
        r#"
[cluster.alpha]
domain = "pulcy.com"
instance-count = {count}
{network}
[cluster.alpha.quark]
image = "coreos-stable"
region = "ams3"
"#
    );
    let blueprint = Blueprint::parse(&doc).unwrap();
    TopologyAssigner::new(ClusterOptions::from_blueprint(&blueprint, "").unwrap())
}

#[tokio::test]
async fn create_alpha_with_vpn() {
    let f = fixture();
    let topology = alpha(3, Some("192.168.35.0/24"));
    let report = f
        .orchestrator
        .create_cluster(&OpContext::new(), &topology, InstanceRoles::all())
        .await
        .unwrap();

    let vpn: Vec<Ipv4Addr> = report.instances.iter().map(|i| i.vpn_ip.unwrap()).collect();
    assert_eq!(
        vpn,
        [
            Ipv4Addr::new(192, 168, 35, 1),
            Ipv4Addr::new(192, 168, 35, 2),
            Ipv4Addr::new(192, 168, 35, 3)
        ]
    );
    assert_eq!(f.discovery.requests(), [3]);

    let records = f.dns.records();
    for instance in &report.instances {
        assert!(instance.name.ends_with(".alpha.pulcy.com"));
        let public = instance.public_ipv4.unwrap().to_string();
        assert!(records.iter().any(|r| r.record_type == RecordType::A
            && r.name == instance.name
            && r.value == public));
        assert!(records.iter().any(|r| r.record_type == RecordType::A
            && r.name == "alpha.pulcy.com"
            && r.value == public));
    }
    assert_eq!(records.len(), 6);

    for instance in &report.instances {
        let members = f.hosts.host(&instance.name).file(MEMBERS).unwrap();
        assert_eq!(members.lines().count(), 3);
        assert_eq!(members, report.members.render());
    }
    assert!(report.members.iter().all(|m| !m.etcd_proxy));
    assert!(report
        .members
        .iter()
        .all(|m| m.private_ip.octets()[..3] == [192, 168, 35]));
}

#[tokio::test]
async fn membership_sync_is_idempotent() {
    let f = fixture();
    let topology = alpha(3, None);
    let ctx = OpContext::new();
    f.orchestrator
        .create_cluster(&ctx, &topology, InstanceRoles::all())
        .await
        .unwrap();
    let info = &topology.options().info;

    f.orchestrator.update_cluster(&ctx, info).await.unwrap();
    let first: Vec<String> = f
        .provider
        .live()
        .iter()
        .map(|i| f.hosts.host(&i.name).file(MEMBERS).unwrap())
        .collect();
    f.orchestrator.update_cluster(&ctx, info).await.unwrap();
    let second: Vec<String> = f
        .provider
        .live()
        .iter()
        .map(|i| f.hosts.host(&i.name).file(MEMBERS).unwrap())
        .collect();

    assert_eq!(first, second);
    assert!(first.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn mesh_is_complete_after_one_run() {
    let f = fixture();
    let topology = alpha(4, Some("10.8.0.0/24"));
    let report = f
        .orchestrator
        .create_cluster(&OpContext::new(), &topology, InstanceRoles::all())
        .await
        .unwrap();
    let n = report.instances.len();
    assert_eq!(report.mesh.unwrap().descriptors_distributed, n * (n - 1));

    for instance in &report.instances {
        let host = f.hosts.host(&instance.name);
        let mut names = host.list_dir(TINC_HOSTS);
        names.sort();
        let mut expected: Vec<String> = report.instances.iter().map(|i| i.tinc_name()).collect();
        expected.sort();
        assert_eq!(names, expected, "descriptors on {}", instance.name);

        let foreign = names.iter().filter(|n| **n != instance.tinc_name()).count();
        assert_eq!(foreign, n - 1);
        for name in &names {
            let descriptor = host.file(&format!("{TINC_HOSTS}/{name}")).unwrap();
            assert!(descriptor.contains("-----BEGIN RSA PUBLIC KEY-----"));
        }
    }
}

#[tokio::test]
async fn one_failed_create_still_attempts_all() {
    let f = fixture();
    f.provider.fail_create_index(2);
    let topology = alpha(5, None);
    let err = f
        .orchestrator
        .create_cluster(&OpContext::new(), &topology, InstanceRoles::all())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider);
    assert_eq!(f.provider.created().len(), 5);
    // no rollback
    assert_eq!(f.provider.live().len(), 4);
}

#[tokio::test]
async fn dns_failure_fails_create_after_every_attempt() {
    let f = fixture();
    f.dns.fail_all();
    let err = f
        .orchestrator
        .create_cluster(&OpContext::new(), &alpha(3, None), InstanceRoles::all())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Dns);
    assert_eq!(f.provider.created().len(), 3);
    assert_eq!(f.provider.live().len(), 3);
    // membership is never pushed after a failed create
    for instance in &f.provider.live() {
        assert!(f.hosts.host(&instance.name).file(MEMBERS).is_none());
    }
}

#[tokio::test]
async fn delete_continues_past_dns_failure() {
    let f = fixture();
    let topology = alpha(3, None);
    let ctx = OpContext::new();
    let created = f
        .orchestrator
        .create_cluster(&ctx, &topology, InstanceRoles::all())
        .await
        .unwrap();
    let stuck = &created.instances.0[1].name;
    f.dns.fail_name(stuck);

    let err = f
        .orchestrator
        .delete_cluster(&ctx, &topology.options().info)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dns);

    let mut attempts = f.provider.delete_attempts();
    attempts.sort();
    let mut others: Vec<String> = created
        .instances
        .iter()
        .map(|i| i.name.clone())
        .filter(|n| n != stuck)
        .collect();
    others.sort();
    assert_eq!(attempts, others);
    let live: Vec<String> = f.provider.live().iter().map(|i| i.name.clone()).collect();
    assert_eq!(live, [stuck.clone()]);
}

#[tokio::test(start_paused = true)]
async fn stalled_host_times_out_update() {
    let f = fixture();
    let topology = alpha(3, None);
    f.orchestrator
        .create_cluster(&OpContext::new(), &topology, InstanceRoles::all())
        .await
        .unwrap();
    let live = f.provider.live();
    let stalled = f.hosts.host(&live.0[0].name);
    stalled.stall_commands_matching("cat /etc/machine-id");
    let reads_before: Vec<usize> = live
        .iter()
        .map(|i| machine_id_reads(&f.hosts, &i.name))
        .collect();

    let ctx = OpContext::new().with_call_timeout(Duration::from_secs(30));
    let started = tokio::time::Instant::now();
    let err = f
        .orchestrator
        .update_cluster(&ctx, &topology.options().info)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(machine_id_reads(&f.hosts, &live.0[0].name), reads_before[0]);
    for (i, instance) in live.iter().enumerate().skip(1) {
        assert_eq!(machine_id_reads(&f.hosts, &instance.name), reads_before[i] + 1);
    }
}

fn machine_id_reads(hosts: &FakeHosts, name: &str) -> usize {
    hosts
        .host(name)
        .commands()
        .iter()
        .filter(|c| *c == "cat /etc/machine-id")
        .count()
}

#[tokio::test]
async fn scale_out_core_instance_joins_etcd() {
    let f = fixture();
    let topology = alpha(3, Some("192.168.35.0/24"));
    let ctx = OpContext::new();
    let created = f
        .orchestrator
        .create_cluster(&ctx, &topology, InstanceRoles::all())
        .await
        .unwrap();

    let report = f
        .orchestrator
        .add_instance(&ctx, &topology, InstanceRoles::all())
        .await
        .unwrap();
    assert_eq!(report.instances.len(), 4);
    assert_eq!(report.members.len(), 4);

    let added = f.provider.created().pop().unwrap();
    assert_eq!(added.vpn_ip, Some(Ipv4Addr::new(192, 168, 35, 4)));
    assert_eq!(added.etcd_discovery_url, "https://discovery.etcd.io/7f3a");
    // discovery is only asked once, at creation
    assert_eq!(f.discovery.requests(), [3]);

    let announce = "etcdctl member add machine-4 http://192.168.35.4:2380".to_string();
    let announced: Vec<_> = created
        .instances
        .iter()
        .filter(|i| f.hosts.host(&i.name).commands().contains(&announce))
        .collect();
    assert_eq!(announced.len(), 1);

    for instance in &report.instances {
        let members = f.hosts.host(&instance.name).file(MEMBERS).unwrap();
        assert_eq!(members.lines().count(), 4);
    }
}

#[tokio::test]
async fn scale_out_proxy_skips_etcd() {
    let f = fixture();
    let topology = alpha(2, None);
    let ctx = OpContext::new();
    f.orchestrator
        .create_cluster(&ctx, &topology, InstanceRoles::all())
        .await
        .unwrap();

    let report = f
        .orchestrator
        .add_instance(&ctx, &topology, InstanceRoles::worker())
        .await
        .unwrap();
    assert_eq!(report.members.iter().filter(|m| m.etcd_proxy).count(), 1);
    for instance in &f.provider.live() {
        let commands = f.hosts.host(&instance.name).commands();
        assert!(commands.iter().all(|c| !c.starts_with("etcdctl")));
    }
}

#[tokio::test]
async fn scale_out_needs_an_existing_cluster() {
    let f = fixture();
    let err = f
        .orchestrator
        .add_instance(&OpContext::new(), &alpha(3, None), InstanceRoles::all())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(f.provider.created().is_empty());
}

#[tokio::test]
async fn delete_removes_everything() {
    let f = fixture();
    let topology = alpha(3, None);
    let ctx = OpContext::new();
    f.orchestrator
        .create_cluster(&ctx, &topology, InstanceRoles::all())
        .await
        .unwrap();

    let deleted = f
        .orchestrator
        .delete_cluster(&ctx, &topology.options().info)
        .await
        .unwrap();
    assert_eq!(deleted, 3);
    assert!(f.provider.live().is_empty());
    assert!(f.dns.records().is_empty());
}

#[tokio::test]
async fn cancelled_context_creates_nothing() {
    let f = fixture();
    let ctx = OpContext::new();
    ctx.cancel();
    let err = f
        .orchestrator
        .create_cluster(&ctx, &alpha(3, None), InstanceRoles::all())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(f.provider.created().is_empty());
}
