//! Runtime settings for the orchestrator, passed explicitly into every
//! entry point. Loaded from an optional TOML file; every field has a
//! default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ResultExt};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ssh: SshSettings,
    pub fanout: FanOutSettings,
    pub membership: MembershipSettings,
    pub mesh: MeshSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: "core".to_string(),
            port: 22,
            identity_file: None,
            connect_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutSettings {
    /// Upper bound on concurrently running per-instance tasks.
    pub parallelism: usize,
    /// Deadline for a single remote command or provider call.
    pub call_timeout_secs: u64,
}

impl Default for FanOutSettings {
    fn default() -> Self {
        Self {
            parallelism: 16,
            call_timeout_secs: 300,
        }
    }
}

impl FanOutSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipSettings {
    pub config_dir: String,
    pub members_file: String,
    /// Local service that consumes the members file.
    pub service: String,
    pub etcd_peer_port: u16,
}

impl Default for MembershipSettings {
    fn default() -> Self {
        Self {
            config_dir: "/etc/pulcy".to_string(),
            members_file: "cluster-members".to_string(),
            service: "gluon.service".to_string(),
            etcd_peer_port: 2380,
        }
    }
}

impl MembershipSettings {
    pub fn members_path(&self) -> String {
        format!("{}/{}", self.config_dir, self.members_file)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshSettings {
    /// tinc network name.
    pub network_name: String,
    pub base_dir: String,
    pub interface: String,
    pub key_size: u32,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            network_name: "pulcy".to_string(),
            base_dir: "/etc/tinc".to_string(),
            interface: "tun0".to_string(),
            key_size: 4096,
        }
    }
}

impl MeshSettings {
    pub fn network_dir(&self) -> String {
        format!("{}/{}", self.base_dir, self.network_name)
    }

    pub fn hosts_dir(&self) -> String {
        format!("{}/hosts", self.network_dir())
    }

    pub fn service_unit(&self) -> String {
        format!("tinc-{}.service", self.network_name)
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("parsing settings {}", path.display()))?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            crate::Error::with_source(crate::ErrorKind::Internal, "serializing settings", e)
        })
    }
}
