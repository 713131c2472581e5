//! Scaleway-backed compute (Instance API) and DNS (Domains API).

mod compute;
mod dns;

pub use compute::ScalewayCompute;
pub use dns::ScalewayDns;

use anyhow::{Context, Result};
use hubfleet_common::Secret;
use reqwest::Client;
use std::env;
use std::fs;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.scaleway.com";

#[derive(Debug, Clone)]
pub struct ScalewayConfig {
    pub api_url: String,
    pub project_id: String,
    pub secret_key: Secret<String>,
    pub zone: String,
    pub image: String,
    pub commercial_type: String,
    /// Scaleway DNS zone holding tenant records (e.g. `hubs.example.com`).
    pub dns_zone: String,
    pub dns_ttl: u32,
}

fn required(key: &str) -> Result<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .with_context(|| format!("missing required env var: {key}"))
}

impl ScalewayConfig {
    pub fn from_env() -> Result<Self> {
        // Prefer *_FILE for secrets (Docker/K8s friendly), fallback to env var.
        let secret_key_file = env::var("SCW_SECRET_KEY_FILE")
            .unwrap_or_else(|_| "/run/secrets/scw_secret_key".to_string());
        let secret_key = fs::read_to_string(&secret_key_file)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(Ok)
            .unwrap_or_else(|| required("SCW_SECRET_KEY"))?;

        Ok(Self {
            api_url: env::var("SCW_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            project_id: required("SCW_PROJECT_ID")?,
            secret_key: Secret::new(secret_key),
            zone: env::var("SCW_ZONE").unwrap_or_else(|_| "fr-par-1".to_string()),
            image: required("SCW_IMAGE")?,
            commercial_type: env::var("SCW_COMMERCIAL_TYPE").unwrap_or_else(|_| "DEV1-S".to_string()),
            dns_zone: required("SCW_DNS_ZONE")?,
            dns_ttl: env::var("SCW_DNS_TTL")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(60),
        })
    }

    pub(crate) fn http_client(&self) -> Result<Client> {
        // Default reqwest client has no overall timeout; a stalled API call would hang the sequence.
        Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .context("build Scaleway HTTP client")
    }

    pub(crate) fn headers(&self) -> Result<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "X-Auth-Token",
            reqwest::header::HeaderValue::from_str(self.secret_key.expose())
                .context("Scaleway secret key is not a valid header value")?,
        );
        Ok(headers)
    }
}

/// Turn a non-2xx response into an error carrying the body text.
pub(crate) async fn ensure_success(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    tracing::warn!(status = status.as_u16(), "❌ [Scaleway API] {} failed: {}", what, body);
    anyhow::bail!("Scaleway {} failed: status={} body={}", what, status.as_u16(), body)
}

#[cfg(test)]
pub(crate) fn test_config(api_url: &str) -> ScalewayConfig {
    ScalewayConfig {
        api_url: api_url.to_string(),
        project_id: "proj-1".to_string(),
        secret_key: Secret::new("scw-secret".to_string()),
        zone: "fr-par-1".to_string(),
        image: "img-hub".to_string(),
        commercial_type: "DEV1-S".to_string(),
        dns_zone: "hubs.example.com".to_string(),
        dns_ttl: 60,
    }
}
