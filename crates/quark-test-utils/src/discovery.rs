use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use quark_core::{DiscoveryService, OpContext, Result};

/// Hands out one fixed discovery URL and records requested sizes.
#[derive(Clone)]
pub struct FakeDiscovery {
    url: String,
    requests: Arc<Mutex<Vec<u32>>>,
}

impl FakeDiscovery {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            requests: Arc::default(),
        }
    }

    pub fn service(&self) -> Arc<dyn DiscoveryService> {
        Arc::new(self.clone())
    }

    pub fn requests(&self) -> Vec<u32> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl DiscoveryService for FakeDiscovery {
    async fn new_discovery_url(&self, _ctx: &OpContext, size: u32) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(size);
        Ok(self.url.clone())
    }
}
