use super::{ensure_success, ScalewayConfig};
use crate::DnsProvider;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// A records `<slug>.<dns_zone>` managed through the Scaleway Domains API.
pub struct ScalewayDns {
    client: Client,
    config: ScalewayConfig,
}

impl ScalewayDns {
    pub fn new(config: ScalewayConfig) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            config,
        })
    }

    fn records_url(&self) -> String {
        format!(
            "{}/domain/v2beta1/dns-zones/{}/records",
            self.config.api_url.trim_end_matches('/'),
            self.config.dns_zone
        )
    }

    async fn patch_records(&self, changes: Value, what: &str) -> Result<()> {
        let resp = self
            .client
            .patch(self.records_url())
            .headers(self.config.headers()?)
            .json(&json!({ "return_all_records": false, "changes": changes }))
            .send()
            .await?;
        ensure_success(resp, what).await?;
        Ok(())
    }
}

#[async_trait]
impl DnsProvider for ScalewayDns {
    async fn upsert_record(&self, slug: &str, address: &str) -> Result<()> {
        let changes = json!([{
            "set": {
                "id_fields": { "name": slug, "type": "A" },
                "records": [{
                    "name": slug,
                    "type": "A",
                    "data": address,
                    "ttl": self.config.dns_ttl,
                }],
            }
        }]);
        self.patch_records(changes, "upsert dns record").await?;
        tracing::info!(slug, %address, zone = %self.config.dns_zone, "✅ [Scaleway DNS] record set");
        Ok(())
    }

    async fn remove_record(&self, slug: &str, address: &str) -> Result<()> {
        let changes = json!([{
            "delete": {
                "id_fields": { "name": slug, "type": "A", "data": address },
            }
        }]);
        self.patch_records(changes, "remove dns record").await?;
        tracing::info!(slug, zone = %self.config.dns_zone, "✅ [Scaleway DNS] record removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaleway::test_config;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn upsert_sets_a_record_for_slug() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/domain/v2beta1/dns-zones/hubs.example.com/records"))
            .and(body_partial_json(json!({
                "changes": [{ "set": {
                    "id_fields": { "name": "jane-doe", "type": "A" },
                    "records": [{ "name": "jane-doe", "type": "A", "data": "51.15.0.7", "ttl": 60 }]
                }}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let dns = ScalewayDns::new(test_config(&server.uri())).unwrap();
        dns.upsert_record("jane-doe", "51.15.0.7").await.unwrap();
    }

    #[tokio::test]
    async fn remove_reports_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/domain/v2beta1/dns-zones/hubs.example.com/records"))
            .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
            .mount(&server)
            .await;

        let dns = ScalewayDns::new(test_config(&server.uri())).unwrap();
        let err = dns.remove_record("jane-doe", "51.15.0.7").await.unwrap_err();
        assert!(err.to_string().contains("status=403"));
    }
}
