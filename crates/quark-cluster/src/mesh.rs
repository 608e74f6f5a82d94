//! Full-mesh tinc VPN configuration.
//!
//! Runs in three fan-out phases, each joined before the next starts:
//!
//! 1. **generate**: write `tinc.conf`, the host descriptor, the up/down
//!    scripts and the systemd unit on every instance, then generate a key
//!    pair, which appends the public key to the local descriptor.
//! 2. **distribute**: read every instance's completed descriptor and write
//!    it into the hosts directory of every other instance.
//! 3. **activate**: restart the tinc unit everywhere.

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use quark_core::remote::shell_quote;
use quark_core::settings::MeshSettings;
use quark_core::{
    ClusterInstance, ClusterInstanceList, Error, HostConnector, OpContext, RemoteHost,
    RemoteHostExt, Result, ResultExt,
};

use crate::fanout::FanOut;

const PUBLIC_KEY_MARKER: &str = "-----BEGIN";
const UNIT_DIR: &str = "/etc/systemd/system";

// ── Artifacts ──────────────────────────────────────────────────────

pub fn render_tinc_conf(
    settings: &MeshSettings,
    instance: &ClusterInstance,
    peers: &ClusterInstanceList,
) -> String {
    let mut out = format!(
        "Name = {}\nAddressFamily = ipv4\nInterface = {}\n",
        instance.tinc_name(),
        settings.interface
    );
    for peer in peers {
        out.push_str(&format!("ConnectTo = {}\n", peer.tinc_name()));
    }
    out
}

/// Host descriptor without the public key.
pub fn render_host_descriptor(private_ip: Ipv4Addr, vpn_ip: Ipv4Addr) -> String {
    format!("Address = {private_ip}\nSubnet = {vpn_ip}/32\n")
}

pub fn render_tinc_up(vpn_ip: Ipv4Addr) -> String {
    format!("#!/bin/sh\nip link set $INTERFACE up\nip addr add {vpn_ip}/24 dev $INTERFACE\n")
}

pub fn render_tinc_down(vpn_ip: Ipv4Addr) -> String {
    format!("#!/bin/sh\nip addr del {vpn_ip}/24 dev $INTERFACE\nip link set $INTERFACE down\n")
}

pub fn render_unit(settings: &MeshSettings) -> String {
    let net = &settings.network_name;
    format!(
        "[Unit]\n\
         Description=tinc VPN ({net})\n\
         After=network.target\n\
         \n\
         [Service]\n\
         ExecStart=/usr/sbin/tincd -n {net} -D\n\
         Restart=always\n\
         RestartSec=5\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n"
    )
}

pub fn keygen_command(settings: &MeshSettings) -> String {
    let key = shell_quote(&format!("{}/rsa_key.priv", settings.network_dir()));
    format!(
        "sudo rm -f {key} && sudo tincd -n {} -K{}",
        shell_quote(&settings.network_name),
        settings.key_size
    )
}

/// Counts from one configuration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MeshStats {
    pub instances: usize,
    /// Foreign descriptors written; `n * (n - 1)` for a full mesh.
    pub descriptors_distributed: usize,
}

struct Node {
    instance: ClusterInstance,
    private_ip: Ipv4Addr,
    vpn_ip: Ipv4Addr,
}

impl Node {
    fn from_instance(instance: &ClusterInstance) -> Result<Self> {
        let vpn_ip = instance.vpn_ip.ok_or_else(|| {
            Error::validation(format!("instance {} has no VPN address", instance.name))
        })?;
        Ok(Self {
            private_ip: instance.require_private_ipv4()?,
            vpn_ip,
            instance: instance.clone(),
        })
    }
}

// ── Configurator ───────────────────────────────────────────────────

pub struct MeshConfigurator {
    hosts: Arc<dyn HostConnector>,
    settings: MeshSettings,
    parallelism: usize,
}

impl MeshConfigurator {
    pub fn new(hosts: Arc<dyn HostConnector>, settings: MeshSettings) -> Self {
        Self {
            hosts,
            settings,
            parallelism: crate::fanout::DEFAULT_MAX_PARALLELISM,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Whether any instance in the list is on the mesh.
    pub fn wanted(instances: &ClusterInstanceList) -> bool {
        instances.iter().any(|i| i.vpn_ip.is_some())
    }

    /// Configure the mesh across every instance in `instances`.
    pub async fn configure(
        &self,
        ctx: &OpContext,
        instances: &ClusterInstanceList,
    ) -> Result<MeshStats> {
        let nodes = instances
            .iter()
            .map(Node::from_instance)
            .collect::<Result<Vec<_>>>()?;

        let hosts = self.connect_all(ctx, &nodes).await?;
        self.generate(ctx, instances, &nodes, &hosts)
            .await
            .context("generating mesh configuration")?;
        let distributed = self
            .distribute(ctx, &nodes, &hosts)
            .await
            .context("distributing mesh host descriptors")?;
        self.activate(ctx, &nodes, &hosts)
            .await
            .context("activating mesh")?;

        let stats = MeshStats {
            instances: nodes.len(),
            descriptors_distributed: distributed,
        };
        info!(
            network = %self.settings.network_name,
            instances = stats.instances,
            descriptors = stats.descriptors_distributed,
            "mesh configured"
        );
        Ok(stats)
    }

    async fn connect_all(
        &self,
        ctx: &OpContext,
        nodes: &[Node],
    ) -> Result<Vec<Arc<dyn RemoteHost>>> {
        let mut fanout = FanOut::with_parallelism(self.parallelism);
        for node in nodes {
            let hosts = Arc::clone(&self.hosts);
            let ctx = ctx.child();
            let instance = node.instance.clone();
            fanout.spawn(instance.name.clone(), async move {
                ctx.run("connect", hosts.connect(&ctx, &instance))
                    .await
                    .with_context(|| format!("connecting to {}", instance.name))
            });
        }
        fanout.join().await.into_result()
    }

    async fn generate(
        &self,
        ctx: &OpContext,
        instances: &ClusterInstanceList,
        nodes: &[Node],
        hosts: &[Arc<dyn RemoteHost>],
    ) -> Result<()> {
        let mut fanout = FanOut::with_parallelism(self.parallelism);
        for (node, host) in nodes.iter().zip(hosts) {
            let settings = self.settings.clone();
            let peers = instances.except(&node.instance.name);
            let tinc_conf = render_tinc_conf(&settings, &node.instance, &peers);
            let descriptor = render_host_descriptor(node.private_ip, node.vpn_ip);
            let tinc_up = render_tinc_up(node.vpn_ip);
            let tinc_down = render_tinc_down(node.vpn_ip);
            let tinc_name = node.instance.tinc_name();
            let host = Arc::clone(host);
            let ctx = ctx.child();
            fanout.spawn(node.instance.name.clone(), async move {
                let net_dir = settings.network_dir();
                host.ensure_dir(&ctx, &settings.hosts_dir()).await?;
                host.write_file(&ctx, &format!("{net_dir}/tinc.conf"), &tinc_conf, 0o644)
                    .await?;
                host.write_file(
                    &ctx,
                    &format!("{}/{tinc_name}", settings.hosts_dir()),
                    &descriptor,
                    0o644,
                )
                .await?;
                host.write_file(&ctx, &format!("{net_dir}/tinc-up"), &tinc_up, 0o755)
                    .await?;
                host.write_file(&ctx, &format!("{net_dir}/tinc-down"), &tinc_down, 0o755)
                    .await?;
                host.write_file(
                    &ctx,
                    &format!("{UNIT_DIR}/{}", settings.service_unit()),
                    &render_unit(&settings),
                    0o644,
                )
                .await?;
                host.systemctl(&ctx, "daemon-reload").await?;
                host.systemctl(&ctx, &format!("enable {}", settings.service_unit()))
                    .await?;
                host.run(&ctx, &keygen_command(&settings), Some("\n\n"))
                    .await
                    .context("generating mesh key pair")?;
                debug!(host = %host.label(), "mesh node generated");
                Ok(())
            });
        }
        fanout.join().await.into_result().map(|_| ())
    }

    /// Returns the number of descriptors written.
    async fn distribute(
        &self,
        ctx: &OpContext,
        nodes: &[Node],
        hosts: &[Arc<dyn RemoteHost>],
    ) -> Result<usize> {
        let hosts_dir = self.settings.hosts_dir();

        let mut reads = FanOut::with_parallelism(self.parallelism);
        for (node, host) in nodes.iter().zip(hosts) {
            let host = Arc::clone(host);
            let ctx = ctx.child();
            let path = format!("{hosts_dir}/{}", node.instance.tinc_name());
            spawn_descriptor_read(&mut reads, node.instance.name.clone(), host, ctx, path);
        }
        let descriptors: Arc<Vec<String>> = Arc::new(reads.join().await.into_result()?);

        let mut writes = FanOut::with_parallelism(self.parallelism);
        for (target, host) in hosts.iter().enumerate() {
            let host = Arc::clone(host);
            let ctx = ctx.child();
            let descriptors = Arc::clone(&descriptors);
            let names: Vec<String> = nodes.iter().map(|n| n.instance.tinc_name()).collect();
            let hosts_dir = hosts_dir.clone();
            writes.spawn(nodes[target].instance.name.clone(), async move {
                let mut written = 0;
                for (source, descriptor) in descriptors.iter().enumerate() {
                    if source == target {
                        continue;
                    }
                    let path = format!("{hosts_dir}/{}", names[source]);
                    host.write_file(&ctx, &path, descriptor, 0o644).await?;
                    written += 1;
                }
                Ok(written)
            });
        }
        let counts = writes.join().await.into_result()?;
        Ok(counts.into_iter().sum())
    }

    async fn activate(
        &self,
        ctx: &OpContext,
        nodes: &[Node],
        hosts: &[Arc<dyn RemoteHost>],
    ) -> Result<()> {
        let mut fanout = FanOut::with_parallelism(self.parallelism);
        for (node, host) in nodes.iter().zip(hosts) {
            let host = Arc::clone(host);
            let ctx = ctx.child();
            let unit = self.settings.service_unit();
            fanout.spawn(node.instance.name.clone(), async move {
                host.systemctl(&ctx, &format!("restart {unit}")).await
            });
        }
        fanout.join().await.into_result().map(|_| ())
    }
}

fn spawn_descriptor_read(
    reads: &mut FanOut<String>,
    label: String,
    host: Arc<dyn RemoteHost>,
    ctx: OpContext,
    path: String,
) {
    reads.spawn(label, async move {
        let descriptor = host.read_file(&ctx, &path).await?;
        if !descriptor.contains(PUBLIC_KEY_MARKER) {
            return Err(Error::remote(format!(
                "{}: {path} has no public key",
                host.label()
            )));
        }
        // exec trims stdout
        Ok(format!("{descriptor}\n"))
    });
}
