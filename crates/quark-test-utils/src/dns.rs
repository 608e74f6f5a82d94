use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use quark_core::{DnsProvider, DnsRecord, Error, OpContext, RecordType, Result};

#[derive(Default)]
struct DnsState {
    records: Vec<(String, DnsRecord)>,
    fail: bool,
    fail_names: HashSet<String>,
}

/// DNS backend holding records in memory.
#[derive(Clone, Default)]
pub struct FakeDns {
    state: Arc<Mutex<DnsState>>,
}

impl FakeDns {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DnsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn provider(&self) -> Arc<dyn DnsProvider> {
        Arc::new(self.clone())
    }

    /// Every record across all domains, in creation order.
    pub fn records(&self) -> Vec<DnsRecord> {
        self.lock().records.iter().map(|(_, r)| r.clone()).collect()
    }

    /// Make every later call fail.
    pub fn fail_all(&self) {
        self.lock().fail = true;
    }

    /// Make every later create or delete for record `name` fail.
    pub fn fail_name(&self, name: &str) {
        self.lock().fail_names.insert(name.to_string());
    }

    fn check(&self, name: Option<&str>) -> Result<()> {
        let state = self.lock();
        if state.fail {
            return Err(Error::dns("fake dns: service unavailable"));
        }
        if let Some(name) = name.filter(|n| state.fail_names.contains(*n)) {
            return Err(Error::dns(format!("fake dns: zone locked for {name}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DnsProvider for FakeDns {
    fn name(&self) -> &str {
        "fake-dns"
    }

    async fn create_record(
        &self,
        _ctx: &OpContext,
        domain: &str,
        record_type: RecordType,
        name: &str,
        value: &str,
    ) -> Result<()> {
        self.check(Some(name))?;
        self.lock().records.push((
            domain.to_string(),
            DnsRecord {
                record_type,
                name: name.to_string(),
                value: value.to_string(),
            },
        ));
        Ok(())
    }

    async fn delete_records(
        &self,
        _ctx: &OpContext,
        domain: &str,
        name: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.check(Some(name))?;
        self.lock().records.retain(|(d, r)| {
            !(d == domain && r.name == name && value.is_none_or(|v| r.value == v))
        });
        Ok(())
    }

    async fn list_records(&self, _ctx: &OpContext, domain: &str) -> Result<Vec<DnsRecord>> {
        self.check(None)?;
        Ok(self
            .lock()
            .records
            .iter()
            .filter(|(d, _)| d == domain)
            .map(|(_, r)| r.clone())
            .collect())
    }
}
