//! Capability traits for the collaborators the orchestrator drives.
//!
//! One implementation per backend, chosen at startup from configuration
//! and held as `Arc<dyn _>`. Every call takes an [`OpContext`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::OpContext;
use crate::error::Result;
use crate::options::InstanceOptions;
use crate::types::{
    CatalogEntry, ClusterInfo, ClusterInstance, ClusterInstanceList, DnsRecord, RecordType,
};

/// Cloud backend: creates, lists and deletes instances.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Backend name for logs and errors.
    fn name(&self) -> &str;

    /// Fill in backend-specific defaults (image, region, plan).
    fn apply_instance_defaults(&self, options: &mut InstanceOptions) {
        let _ = options;
    }

    /// Create an instance and return it once the backend reports it active.
    async fn create_instance(
        &self,
        ctx: &OpContext,
        options: &InstanceOptions,
    ) -> Result<ClusterInstance>;

    /// Instances whose name ends with `.<name>.<domain>`.
    async fn list_instances(
        &self,
        ctx: &OpContext,
        info: &ClusterInfo,
    ) -> Result<ClusterInstanceList>;

    async fn delete_instance(&self, ctx: &OpContext, instance: &ClusterInstance) -> Result<()>;

    async fn list_regions(&self, ctx: &OpContext) -> Result<Vec<CatalogEntry>>;

    async fn list_images(&self, ctx: &OpContext) -> Result<Vec<CatalogEntry>>;

    async fn list_keys(&self, ctx: &OpContext) -> Result<Vec<CatalogEntry>>;

    async fn list_plans(&self, ctx: &OpContext) -> Result<Vec<CatalogEntry>>;
}

/// DNS backend.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn create_record(
        &self,
        ctx: &OpContext,
        domain: &str,
        record_type: RecordType,
        name: &str,
        value: &str,
    ) -> Result<()>;

    /// Delete records named `name`; when `value` is given only records
    /// holding that value are removed.
    async fn delete_records(
        &self,
        ctx: &OpContext,
        domain: &str,
        name: &str,
        value: Option<&str>,
    ) -> Result<()>;

    async fn list_records(&self, ctx: &OpContext, domain: &str) -> Result<Vec<DnsRecord>>;
}

/// An authenticated command channel to one host.
#[async_trait]
pub trait RemoteHost: Send + Sync {
    /// Host label for logs and errors.
    fn label(&self) -> &str;

    /// Run `command`, optionally feeding `stdin`, and return trimmed
    /// stdout. A non-zero exit fails with the trimmed stderr as context.
    async fn exec(&self, ctx: &OpContext, command: &str, stdin: Option<&str>) -> Result<String>;
}

/// Opens [`RemoteHost`] channels to instances.
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn connect(
        &self,
        ctx: &OpContext,
        instance: &ClusterInstance,
    ) -> Result<Arc<dyn RemoteHost>>;
}

/// Issues etcd discovery tokens.
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// A fresh discovery URL for a cluster of `size` voters.
    async fn new_discovery_url(&self, ctx: &OpContext, size: u32) -> Result<String>;
}
