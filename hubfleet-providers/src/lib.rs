use anyhow::Result;
use async_trait::async_trait;
use hubfleet_common::Secret;
use tokio_util::sync::CancellationToken;

/// What the compute provider hands back once a machine exists.
#[derive(Debug, Clone)]
pub struct LaunchedMachine {
    pub machine_id: String,
    pub address: String,
    /// Remote-access credential minted for this machine, if the provider issues one.
    pub credential: Option<Secret<String>>,
}

/// Borrowed view of a machine for remote execution.
#[derive(Debug, Clone, Copy)]
pub struct MachineRef<'a> {
    pub machine_id: &'a str,
    pub address: &'a str,
    pub credential: Option<&'a Secret<String>>,
}

/// Arguments of the remote provisioning command.
#[derive(Debug, Clone, Copy)]
pub struct ProvisionParams<'a> {
    pub slug: &'a str,
    pub login_secret: &'a Secret<String>,
    pub internal_secret: &'a Secret<String>,
}

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn launch(&self, slug: &str) -> Result<LaunchedMachine>;

    /// Blocks (bounded) until the machine accepts remote commands. Must return
    /// promptly once `cancel` fires.
    async fn wait_until_reachable(
        &self,
        machine_id: &str,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn run_provision_command(
        &self,
        machine: MachineRef<'_>,
        params: ProvisionParams<'_>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn terminate(&self, machine_id: &str) -> Result<()>;
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn upsert_record(&self, slug: &str, address: &str) -> Result<()>;
    async fn remove_record(&self, slug: &str, address: &str) -> Result<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_welcome(&self, email: &str, slug: &str, login_secret: &Secret<String>) -> Result<()>;
    async fn send_export_ready(&self, email: &str, download_url: &str) -> Result<()>;
}

#[async_trait]
pub trait Exporter: Send + Sync {
    /// Archives the tenant's data on the machine and returns a time-limited download link.
    async fn export(
        &self,
        machine: MachineRef<'_>,
        slug: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "scaleway")]
pub mod scaleway;

#[cfg(feature = "scaleway")]
pub mod ssh;

#[cfg(feature = "scaleway")]
pub mod export;

#[cfg(feature = "smtp")]
pub mod smtp;
