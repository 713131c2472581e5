use super::{ensure_success, ScalewayConfig};
use crate::ssh::{self, SshRunner};
use crate::{ComputeProvider, LaunchedMachine, MachineRef, ProvisionParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use hubfleet_common::poll::{poll_until, Attempt, PollPolicy};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PROVISION_SCRIPT: &str = include_str!("../../scripts/provision.sh");

fn build_ssh_key_cloud_init(ssh_pub: &str, user: &str) -> String {
    format!(
        r#"#cloud-config
users:
  - default
  - name: {user}
    sudo: ALL=(ALL) NOPASSWD:ALL
    shell: /bin/bash
    ssh_authorized_keys:
      - {key}
"#,
        user = user,
        key = ssh_pub.trim()
    )
}

pub struct ScalewayCompute {
    client: Client,
    config: ScalewayConfig,
    ssh: SshRunner,
    reachability: PollPolicy,
    ssh_port: u16,
}

impl ScalewayCompute {
    pub fn new(config: ScalewayConfig, ssh: SshRunner, reachability: PollPolicy) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            config,
            ssh,
            reachability,
            ssh_port: 22,
        })
    }

    pub fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }

    fn servers_url(&self) -> String {
        format!(
            "{}/instance/v1/zones/{}/servers",
            self.config.api_url.trim_end_matches('/'),
            self.config.zone
        )
    }

    async fn create_server(&self, slug: &str) -> Result<serde_json::Value> {
        let body = json!({
            "name": format!("hub-{slug}"),
            "commercial_type": self.config.commercial_type,
            "project": self.config.project_id,
            "image": self.config.image,
            "tags": ["hubfleet", format!("slug:{slug}")],
            "dynamic_ip_required": true,
        });
        tracing::info!(slug, zone = %self.config.zone, "🔵 [Scaleway API] creating server");

        let resp = self
            .client
            .post(self.servers_url())
            .headers(self.config.headers()?)
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp, "create server").await?;
        let json: serde_json::Value = resp.json().await?;
        Ok(json["server"].clone())
    }

    async fn set_cloud_init(&self, server_id: &str, cloud_init: &str) -> Result<()> {
        let url = format!("{}/{}/user_data/cloud-init", self.servers_url(), server_id);
        let resp = self
            .client
            .patch(url)
            .headers(self.config.headers()?)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(cloud_init.to_string())
            .send()
            .await?;
        ensure_success(resp, "set cloud-init").await?;
        Ok(())
    }

    async fn server_action(&self, server_id: &str, action: &str) -> Result<reqwest::Response> {
        let url = format!("{}/{}/action", self.servers_url(), server_id);
        Ok(self
            .client
            .post(url)
            .headers(self.config.headers()?)
            .json(&json!({ "action": action }))
            .send()
            .await?)
    }

    /// `None` when the server no longer exists.
    async fn find_server(&self, server_id: &str) -> Result<Option<serde_json::Value>> {
        let url = format!("{}/{}", self.servers_url(), server_id);
        let resp = self
            .client
            .get(url)
            .headers(self.config.headers()?)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp, "get server").await?;
        let json: serde_json::Value = resp.json().await?;
        Ok(Some(json["server"].clone()))
    }

    /// DELETE only works on a stopped server and leaves its volumes behind.
    async fn delete_stopped(&self, server_id: &str, server: &serde_json::Value) -> Result<()> {
        let url = format!("{}/{}", self.servers_url(), server_id);
        let resp = self
            .client
            .delete(url)
            .headers(self.config.headers()?)
            .send()
            .await?;
        if resp.status() != reqwest::StatusCode::NOT_FOUND {
            ensure_success(resp, "delete server").await?;
        }

        for volume_id in attached_volume_ids(server) {
            let url = format!(
                "{}/instance/v1/zones/{}/volumes/{}",
                self.config.api_url.trim_end_matches('/'),
                self.config.zone,
                volume_id
            );
            let resp = self
                .client
                .delete(url)
                .headers(self.config.headers()?)
                .send()
                .await?;
            if resp.status() != reqwest::StatusCode::NOT_FOUND {
                ensure_success(resp, "delete volume").await?;
            }
            tracing::info!(machine_id = server_id, %volume_id, "🗑️ [Scaleway API] volume deleted");
        }
        Ok(())
    }

    async fn get_server(&self, server_id: &str) -> Result<serde_json::Value> {
        let url = format!("{}/{}", self.servers_url(), server_id);
        let resp = self
            .client
            .get(url)
            .headers(self.config.headers()?)
            .send()
            .await?;
        let resp = ensure_success(resp, "get server").await?;
        let json: serde_json::Value = resp.json().await?;
        Ok(json["server"].clone())
    }

    async fn bring_up(&self, server: &serde_json::Value, server_id: &str, public_key: &str) -> Result<String> {
        let cloud_init = build_ssh_key_cloud_init(public_key, &self.ssh.user);
        self.set_cloud_init(server_id, &cloud_init).await?;

        let resp = self.server_action(server_id, "poweron").await?;
        ensure_success(resp, "poweron").await?;

        if let Some(ip) = public_address(server) {
            return Ok(ip);
        }
        let refreshed = self.get_server(server_id).await?;
        public_address(&refreshed).with_context(|| format!("server {server_id} has no public address"))
    }

    async fn probe_reachable(&self, server_id: &str, address: &str) -> Attempt<()> {
        let server = match self.get_server(server_id).await {
            Ok(s) => s,
            Err(e) => return Attempt::Pending(format!("{e:#}")),
        };
        let state = server["state"].as_str().unwrap_or("unknown");
        match state {
            "running" => {}
            "locked" => return Attempt::Abort(format!("server {server_id} is locked")),
            other => return Attempt::Pending(format!("server state: {other}")),
        }

        let target = format!("{}:{}", address.split('/').next().unwrap_or(address), self.ssh_port);
        match tokio::time::timeout(Duration::from_secs(3), tokio::net::TcpStream::connect(&target)).await {
            Ok(Ok(_)) => Attempt::Ready(()),
            Ok(Err(e)) => Attempt::Pending(format!("ssh port on {target}: {e}")),
            Err(_) => Attempt::Pending(format!("ssh port on {target}: connect timed out")),
        }
    }
}

fn attached_volume_ids(server: &serde_json::Value) -> Vec<String> {
    server["volumes"]
        .as_object()
        .map(|volumes| {
            volumes
                .values()
                .filter_map(|v| v["id"].as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn public_address(server: &serde_json::Value) -> Option<String> {
    server["public_ip"]["address"]
        .as_str()
        .or_else(|| server["public_ips"][0]["address"].as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[async_trait]
impl ComputeProvider for ScalewayCompute {
    async fn launch(&self, slug: &str) -> Result<LaunchedMachine> {
        let keys = ssh::generate_key_pair(&format!("hub-{slug}")).await?;
        let server = self.create_server(slug).await?;
        let server_id = server["id"]
            .as_str()
            .context("No server id in create response")?
            .to_string();

        match self.bring_up(&server, &server_id, &keys.public_key).await {
            Ok(address) => {
                tracing::info!(slug, machine_id = %server_id, %address, "✅ [Scaleway API] server launched");
                Ok(LaunchedMachine {
                    machine_id: server_id,
                    address,
                    credential: Some(keys.private_key),
                })
            }
            Err(e) => {
                // Half-created server: remove it so it does not leak.
                if let Err(cleanup) = self.terminate(&server_id).await {
                    tracing::warn!(machine_id = %server_id, error = %cleanup, "⚠️ cleanup of half-launched server failed");
                }
                Err(e.context(format!("bring up server {server_id}")))
            }
        }
    }

    async fn wait_until_reachable(
        &self,
        machine_id: &str,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        poll_until(self.reachability, cancel, || self.probe_reachable(machine_id, address))
            .await
            .with_context(|| format!("server {machine_id} never became reachable"))
    }

    async fn run_provision_command(
        &self,
        machine: MachineRef<'_>,
        params: ProvisionParams<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = machine
            .credential
            .with_context(|| format!("no ssh credential for server {}", machine.machine_id))?;
        let stdout = self
            .ssh
            .run_script(
                machine.address,
                key,
                PROVISION_SCRIPT,
                &[
                    params.slug,
                    params.login_secret.expose(),
                    params.internal_secret.expose(),
                ],
                cancel,
            )
            .await?;
        let last_phase = stdout
            .lines()
            .filter_map(|l| l.trim().strip_prefix("::phase::"))
            .last()
            .unwrap_or("none");
        tracing::debug!(machine_id = machine.machine_id, last_phase, "provision script finished");
        Ok(())
    }

    async fn terminate(&self, machine_id: &str) -> Result<()> {
        let Some(server) = self.find_server(machine_id).await? else {
            tracing::info!(machine_id, "ℹ️ [Scaleway API] server already gone");
            return Ok(());
        };
        let state = server["state"].as_str().unwrap_or("unknown");

        if matches!(state, "stopped" | "stopped in place") {
            // Half-launched servers never powered on; the terminate action is refused for them.
            self.delete_stopped(machine_id, &server).await?;
            tracing::info!(machine_id, "✅ [Scaleway API] stopped server deleted");
            return Ok(());
        }

        // `terminate` deletes the server together with its volumes and dynamic IP.
        let resp = self.server_action(machine_id, "terminate").await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::info!(machine_id, "ℹ️ [Scaleway API] server already gone");
            return Ok(());
        }
        ensure_success(resp, "terminate").await?;
        Ok(())
    }
}
