use crate::ssh::SshRunner;
use crate::{Exporter, MachineRef};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

const EXPORT_SCRIPT: &str = include_str!("../scripts/export.sh");

/// Runs the archival script on the tenant machine over SSH. The machine
/// uploads the archive itself and prints a presigned link.
pub struct SshExporter {
    ssh: SshRunner,
    bucket: String,
    link_ttl: Duration,
}

impl SshExporter {
    pub fn new(ssh: SshRunner, bucket: impl Into<String>, link_ttl: Duration) -> Self {
        Self {
            ssh,
            bucket: bucket.into(),
            link_ttl,
        }
    }
}

/// The download link is the last `https://` line the script printed.
fn parse_download_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("https://"))
        .last()
        .map(str::to_string)
}

#[async_trait]
impl Exporter for SshExporter {
    async fn export(
        &self,
        machine: MachineRef<'_>,
        slug: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let key = machine
            .credential
            .with_context(|| format!("no ssh credential for server {}", machine.machine_id))?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let object_key = format!("exports/{slug}-{stamp}.tar.gz");
        let ttl = self.link_ttl.as_secs().to_string();

        tracing::info!(slug, machine_id = machine.machine_id, %object_key, "📦 exporting tenant data");
        let stdout = self
            .ssh
            .run_script(
                machine.address,
                key,
                EXPORT_SCRIPT,
                &[slug, &self.bucket, &object_key, &ttl],
                cancel,
            )
            .await
            .context("export script")?;

        parse_download_url(&stdout).context("export script printed no download link")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_last_https_line() {
        let out = "upload: done\nhttps://old.example/1\n  https://bucket.s3.fr-par.scw.cloud/exports/a.tar.gz?X-Amz-Expires=86400  \n";
        assert_eq!(
            parse_download_url(out).as_deref(),
            Some("https://bucket.s3.fr-par.scw.cloud/exports/a.tar.gz?X-Amz-Expires=86400")
        );
    }

    #[test]
    fn no_link_is_none() {
        assert_eq!(parse_download_url("error: access denied\n"), None);
    }
}
