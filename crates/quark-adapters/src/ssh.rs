//! Remote hosts over the system `ssh` client.
//!
//! Each `exec` spawns one `ssh` process. The command's stdin payload is
//! piped through, stdout is returned trimmed and a non-zero exit fails
//! with the trimmed stderr.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use quark_core::settings::SshSettings;
use quark_core::{ClusterInstance, Error, HostConnector, OpContext, RemoteHost, Result, ResultExt};

pub struct SshConnector {
    settings: SshSettings,
}

impl SshConnector {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl HostConnector for SshConnector {
    async fn connect(
        &self,
        _ctx: &OpContext,
        instance: &ClusterInstance,
    ) -> Result<Arc<dyn RemoteHost>> {
        let address = instance.ssh_address().ok_or_else(|| {
            Error::validation(format!("instance {} has no reachable address", instance.name))
        })?;
        Ok(Arc::new(SshSession::new(&self.settings, &instance.name, &address)))
    }
}

pub struct SshSession {
    label: String,
    args: Vec<String>,
}

impl SshSession {
    pub fn new(settings: &SshSettings, label: &str, address: &str) -> Self {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", settings.connect_timeout_secs),
            "-p".to_string(),
            settings.port.to_string(),
        ];
        if let Some(identity) = &settings.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(format!("{}@{address}", settings.user));
        Self {
            label: label.to_string(),
            args,
        }
    }

    /// Full `ssh` argument list for `command`.
    pub fn command_args(&self, command: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl RemoteHost for SshSession {
    fn label(&self) -> &str {
        &self.label
    }

    async fn exec(&self, _ctx: &OpContext, command: &str, stdin: Option<&str>) -> Result<String> {
        let mut child = Command::new("ssh")
            .args(self.command_args(command))
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("spawning ssh")?;

        if let (Some(payload), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(payload.as_bytes())
                .await
                .context("writing ssh stdin")?;
            // close stdin so the remote side sees EOF
            drop(pipe);
        }

        let output = child.wait_with_output().await.context("waiting for ssh")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!(host = %self.label, status = %output.status, %stderr, "remote command failed");
            return Err(Error::remote(format!("{}: {}", output.status, stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn arguments_include_identity_and_target() {
        let settings = SshSettings {
            identity_file: Some(PathBuf::from("/home/ops/.ssh/quark")),
            ..SshSettings::default()
        };
        let session = SshSession::new(&settings, "abc.alpha.pulcy.com", "178.62.0.1");
        let args = session.command_args("cat /etc/machine-id");
        assert_eq!(&args[args.len() - 3..], ["core@178.62.0.1", "--", "cat /etc/machine-id"]);
        assert!(args.windows(2).any(|w| w == ["-i", "/home/ops/.ssh/quark"]));
        assert!(args.windows(2).any(|w| w == ["-p", "22"]));
    }

    #[tokio::test]
    async fn instance_without_address_rejected() {
        let connector = SshConnector::new(SshSettings::default());
        let instance = ClusterInstance {
            id: "1".into(),
            name: "abc.alpha.pulcy.com".into(),
            private_ipv4: None,
            public_ipv4: None,
            public_ipv6: None,
            vpn_ip: None,
            roles: Default::default(),
        };
        let err = match connector.connect(&OpContext::new(), &instance).await {
            Ok(_) => panic!("connected without an address"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), quark_core::ErrorKind::Validation);
    }
}
