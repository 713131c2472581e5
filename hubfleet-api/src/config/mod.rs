// Process configuration, read once at startup
pub mod database;

use anyhow::{bail, Context, Result};
use hubfleet_common::poll::PollPolicy;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres { database_url: String },
    /// Process-local store; records are lost on restart.
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Scaleway,
    Mock,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub store: StoreBackend,
    pub provider: ProviderKind,
    /// Tenants are served at `https://<slug>.<base_domain>`.
    pub base_domain: String,
    pub ssh_user: String,
    pub export_bucket: Option<String>,
    pub export_link_ttl: Duration,
    pub reachability: PollPolicy,
    pub command_connect: PollPolicy,
    pub command_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let secs = |key: &str, default: u64| -> Result<u64> {
            match get(key) {
                Some(v) => v.parse().with_context(|| format!("{key} must be a number of seconds, got '{v}'")),
                None => Ok(default),
            }
        };

        let port = match get("PORT") {
            Some(v) => v.parse().with_context(|| format!("PORT must be a port number, got '{v}'"))?,
            None => 9000,
        };

        let store = match get("STORE").as_deref() {
            Some("memory") => StoreBackend::Memory,
            None | Some("postgres") => StoreBackend::Postgres {
                database_url: get("DATABASE_URL").context("DATABASE_URL must be set (or STORE=memory)")?,
            },
            Some(other) => bail!("unknown STORE '{other}' (expected postgres or memory)"),
        };

        let provider = match get("PROVIDER").map(|p| p.to_lowercase()).as_deref() {
            None | Some("scaleway") => ProviderKind::Scaleway,
            Some("mock") => ProviderKind::Mock,
            Some(other) => bail!("unknown PROVIDER '{other}' (expected scaleway or mock)"),
        };

        let base_domain = match (get("BASE_DOMAIN"), provider) {
            (Some(domain), _) => domain,
            (None, ProviderKind::Mock) => "hubs.localhost".to_string(),
            (None, ProviderKind::Scaleway) => bail!("BASE_DOMAIN must be set"),
        };

        let export_bucket = get("EXPORT_BUCKET");
        if provider == ProviderKind::Scaleway && export_bucket.is_none() {
            bail!("EXPORT_BUCKET must be set");
        }

        Ok(Self {
            port,
            store,
            provider,
            base_domain,
            ssh_user: get("SSH_USER").unwrap_or_else(|| "hub".to_string()),
            export_bucket,
            export_link_ttl: Duration::from_secs(secs("EXPORT_LINK_TTL_SECS", 24 * 3600)?),
            reachability: PollPolicy::from_secs(
                secs("REACHABILITY_POLL_INTERVAL_SECS", 10)?,
                secs("REACHABILITY_TIMEOUT_SECS", 600)?,
            ),
            command_connect: PollPolicy::from_secs(
                secs("COMMAND_POLL_INTERVAL_SECS", 10)?,
                secs("COMMAND_CONNECT_TIMEOUT_SECS", 120)?,
            ),
            command_timeout: Duration::from_secs(secs("COMMAND_TIMEOUT_SECS", 900)?),
            shutdown_grace: Duration::from_secs(secs("SHUTDOWN_GRACE_SECS", 30)?),
        })
    }
}
