//! Convenience operations built on the [`RemoteHost::exec`] primitive.
//!
//! Each helper issues one well-known shell command and runs it under the
//! caller's [`OpContext`].

use async_trait::async_trait;
use tracing::debug;

use crate::capability::RemoteHost;
use crate::context::OpContext;
use crate::error::{Error, Result, ResultExt};

pub const MACHINE_ID_PATH: &str = "/etc/machine-id";
pub const ETCD_DISCOVERY_PATH: &str = "/etc/pulcy/etcd-discovery";
pub const VAULT_ADDRESS_PATH: &str = "/etc/pulcy/vault.env";
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Quote a string for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-=:@,+".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

pub fn read_file_command(path: &str) -> String {
    format!("cat {}", shell_quote(path))
}

pub fn write_file_command(path: &str, mode: u32) -> String {
    let path = shell_quote(path);
    format!("sudo tee {path} > /dev/null && sudo chmod {mode:04o} {path}")
}

pub fn ensure_dir_command(path: &str) -> String {
    format!("sudo mkdir -p {}", shell_quote(path))
}

pub fn systemctl_command(args: &str) -> String {
    format!("sudo systemctl {args}")
}

#[async_trait]
pub trait RemoteHostExt: RemoteHost {
    /// Run a command under the context's cancellation and deadline.
    async fn run(&self, ctx: &OpContext, command: &str, stdin: Option<&str>) -> Result<String> {
        debug!(host = %self.label(), %command, "remote exec");
        ctx.run(command, self.exec(ctx, command, stdin))
            .await
            .with_context(|| format!("{}: '{}'", self.label(), command))
    }

    async fn read_file(&self, ctx: &OpContext, path: &str) -> Result<String> {
        self.run(ctx, &read_file_command(path), None).await
    }

    /// Overwrite `path` with `content` and set its mode.
    async fn write_file(
        &self,
        ctx: &OpContext,
        path: &str,
        content: &str,
        mode: u32,
    ) -> Result<()> {
        self.run(ctx, &write_file_command(path, mode), Some(content))
            .await
            .map(|_| ())
    }

    async fn ensure_dir(&self, ctx: &OpContext, path: &str) -> Result<()> {
        self.run(ctx, &ensure_dir_command(path), None).await.map(|_| ())
    }

    async fn systemctl(&self, ctx: &OpContext, args: &str) -> Result<()> {
        self.run(ctx, &systemctl_command(args), None).await.map(|_| ())
    }

    /// The host's durable machine identifier.
    async fn machine_id(&self, ctx: &OpContext) -> Result<String> {
        let id = self.read_file(ctx, MACHINE_ID_PATH).await?;
        if id.is_empty() {
            return Err(Error::remote(format!("{}: empty machine id", self.label())));
        }
        Ok(id)
    }

    /// The etcd discovery URL the host was bootstrapped with.
    async fn etcd_discovery_url(&self, ctx: &OpContext) -> Result<String> {
        let url = self.read_file(ctx, ETCD_DISCOVERY_PATH).await?;
        if url.is_empty() {
            return Err(Error::remote(format!("{}: empty etcd discovery url", self.label())));
        }
        Ok(url)
    }

    /// `VAULT_ADDR` from the host's vault environment file.
    async fn vault_address(&self, ctx: &OpContext) -> Result<String> {
        let env = self.read_file(ctx, VAULT_ADDRESS_PATH).await?;
        env_value(&env, "VAULT_ADDR")
            .ok_or_else(|| Error::not_found(format!("{}: VAULT_ADDR not set", self.label())))
    }

    /// `VERSION_ID` from `/etc/os-release`.
    async fn os_release(&self, ctx: &OpContext) -> Result<String> {
        let release = self.read_file(ctx, OS_RELEASE_PATH).await?;
        env_value(&release, "VERSION_ID")
            .ok_or_else(|| Error::not_found(format!("{}: VERSION_ID not set", self.label())))
    }
}

impl<T: RemoteHost + ?Sized> RemoteHostExt for T {}

/// Value for `key` in a `KEY=value` file, quotes stripped.
pub fn env_value(content: &str, key: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (k, v) = line.trim().split_once('=')?;
        (k.trim() == key).then(|| v.trim().trim_matches('"').to_string())
    })
}
