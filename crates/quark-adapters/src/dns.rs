use async_trait::async_trait;
use tracing::info;

use quark_core::{DnsProvider, DnsRecord, OpContext, RecordType, Result};

/// DNS backend that logs every change instead of applying it. Used with
/// zones managed outside Quark.
#[derive(Debug, Default)]
pub struct LoggingDns;

#[async_trait]
impl DnsProvider for LoggingDns {
    fn name(&self) -> &str {
        "logging-dns"
    }

    async fn create_record(
        &self,
        _ctx: &OpContext,
        domain: &str,
        record_type: RecordType,
        name: &str,
        value: &str,
    ) -> Result<()> {
        info!(%domain, %record_type, %name, %value, "dns record create (not applied)");
        Ok(())
    }

    async fn delete_records(
        &self,
        _ctx: &OpContext,
        domain: &str,
        name: &str,
        value: Option<&str>,
    ) -> Result<()> {
        info!(%domain, %name, value = value.unwrap_or("*"), "dns record delete (not applied)");
        Ok(())
    }

    async fn list_records(&self, _ctx: &OpContext, _domain: &str) -> Result<Vec<DnsRecord>> {
        Ok(Vec::new())
    }
}
