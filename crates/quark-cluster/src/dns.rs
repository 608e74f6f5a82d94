//! DNS registration of instances.
//!
//! Each instance gets A/AAAA records for its own name and for the cluster
//! name. Records point at public addresses, falling back to the private
//! IPv4 for instances without one.

use std::sync::Arc;

use tracing::{debug, warn};

use quark_core::{
    ClusterInfo, ClusterInstance, DnsProvider, DnsRecord, OpContext, RecordType, Result, ResultExt,
};

/// Records that should exist for `instance` in `info`'s domain.
pub fn instance_records(info: &ClusterInfo, instance: &ClusterInstance) -> Vec<DnsRecord> {
    let mut values = Vec::new();
    match (instance.public_ipv4, instance.private_ipv4) {
        (Some(ip), _) | (None, Some(ip)) => values.push((RecordType::A, ip.to_string())),
        (None, None) => {}
    }
    if let Some(ip) = instance.public_ipv6 {
        values.push((RecordType::Aaaa, ip.to_string()));
    }

    let cluster_name = info.cluster_name();
    let mut records = Vec::with_capacity(values.len() * 2);
    for name in [instance.name.as_str(), cluster_name.as_str()] {
        for (record_type, value) in &values {
            records.push(DnsRecord {
                record_type: *record_type,
                name: name.to_string(),
                value: value.clone(),
            });
        }
    }
    records
}

#[derive(Clone)]
pub struct DnsRegistrar {
    dns: Arc<dyn DnsProvider>,
}

impl DnsRegistrar {
    pub fn new(dns: Arc<dyn DnsProvider>) -> Self {
        Self { dns }
    }

    pub async fn register_instance(
        &self,
        ctx: &OpContext,
        info: &ClusterInfo,
        instance: &ClusterInstance,
    ) -> Result<()> {
        let records = instance_records(info, instance);
        if records.is_empty() {
            warn!(instance = %instance.name, "instance has no address, no DNS records created");
            return Ok(());
        }
        for record in &records {
            ctx.run(
                "dns create",
                self.dns.create_record(
                    ctx,
                    &info.domain,
                    record.record_type,
                    &record.name,
                    &record.value,
                ),
            )
            .await
            .with_context(|| {
                format!(
                    "creating {} record {} -> {} via {}",
                    record.record_type,
                    record.name,
                    record.value,
                    self.dns.name()
                )
            })?;
        }
        debug!(instance = %instance.name, records = records.len(), "dns records created");
        Ok(())
    }

    /// Remove the instance's own records and its entries under the
    /// cluster name; other instances' cluster-name records are kept.
    pub async fn unregister_instance(
        &self,
        ctx: &OpContext,
        info: &ClusterInfo,
        instance: &ClusterInstance,
    ) -> Result<()> {
        ctx.run(
            "dns delete",
            self.dns.delete_records(ctx, &info.domain, &instance.name, None),
        )
        .await
        .with_context(|| format!("deleting records for {}", instance.name))?;

        let cluster_name = info.cluster_name();
        for record in instance_records(info, instance)
            .into_iter()
            .filter(|r| r.name == cluster_name)
        {
            ctx.run(
                "dns delete",
                self.dns
                    .delete_records(ctx, &info.domain, &cluster_name, Some(&record.value)),
            )
            .await
            .with_context(|| format!("deleting {} -> {}", cluster_name, record.value))?;
        }
        debug!(instance = %instance.name, "dns records deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    use quark_test_utils::{FakeDns, instance};

    fn info() -> ClusterInfo {
        ClusterInfo::new("c1", "pulcy.com", "alpha")
    }

    #[test]
    fn records_cover_instance_and_cluster_names() {
        let mut inst = instance(1, true);
        inst.public_ipv6 = Some(Ipv6Addr::LOCALHOST);
        let records = instance_records(&info(), &inst);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].name, inst.name);
        assert_eq!(records[0].record_type, RecordType::A);
        assert_eq!(records[0].value, "178.62.0.1");
        assert_eq!(records[1].record_type, RecordType::Aaaa);
        assert_eq!(records[2].name, "alpha.pulcy.com");
    }

    #[test]
    fn private_address_is_the_fallback() {
        let mut inst = instance(2, false);
        inst.public_ipv4 = None;
        let records = instance_records(&info(), &inst);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.value == "10.129.0.2"));
    }

    #[tokio::test]
    async fn unregister_keeps_sibling_cluster_records() {
        let dns = FakeDns::new();
        let registrar = DnsRegistrar::new(dns.provider());
        let ctx = OpContext::new();
        let a = instance(1, false);
        let b = instance(2, false);
        registrar.register_instance(&ctx, &info(), &a).await.unwrap();
        registrar.register_instance(&ctx, &info(), &b).await.unwrap();
        assert_eq!(dns.records().len(), 4);

        registrar.unregister_instance(&ctx, &info(), &a).await.unwrap();
        let left = dns.records();
        assert_eq!(left.len(), 2);
        assert!(left.iter().all(|r| r.value == "178.62.0.2"));
    }
}
