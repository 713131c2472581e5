use crate::config::{ProviderKind, Settings};
use anyhow::{Context, Result};
use hubfleet_orchestrator::{Capabilities, InstanceStore};
use hubfleet_providers::export::SshExporter;
use hubfleet_providers::mock::MockCloud;
use hubfleet_providers::scaleway::{ScalewayCompute, ScalewayConfig, ScalewayDns};
use hubfleet_providers::smtp::{SmtpConfig, SmtpNotifier};
use hubfleet_providers::ssh::SshRunner;
use std::sync::Arc;

/// Wires the collaborators selected by `PROVIDER` around the given store.
pub struct ProviderManager;

impl ProviderManager {
    pub fn capabilities(settings: &Settings, store: Arc<dyn InstanceStore>) -> Result<Capabilities> {
        match settings.provider {
            ProviderKind::Mock => {
                tracing::warn!("🧪 PROVIDER=mock: no machines, DNS records or emails will be created");
                Ok(Self::mock(store, MockCloud::new()))
            }
            ProviderKind::Scaleway => Self::scaleway(settings, store),
        }
    }

    pub fn mock(store: Arc<dyn InstanceStore>, cloud: Arc<MockCloud>) -> Capabilities {
        Capabilities {
            store,
            compute: cloud.clone(),
            dns: cloud.clone(),
            notifier: cloud.clone(),
            exporter: cloud,
        }
    }

    fn scaleway(settings: &Settings, store: Arc<dyn InstanceStore>) -> Result<Capabilities> {
        let scw = ScalewayConfig::from_env()?;
        let ssh = SshRunner::new(
            settings.ssh_user.clone(),
            settings.command_connect,
            settings.command_timeout,
        );
        let smtp = SmtpConfig::from_env()
            .context("SMTP_SERVER, SMTP_USERNAME and SMTP_PASSWORD (or SMTP_PASSWORD_FILE) must be set")?;
        let bucket = settings
            .export_bucket
            .clone()
            .context("EXPORT_BUCKET must be set")?;

        tracing::info!(zone = %scw.zone, dns_zone = %scw.dns_zone, "☁️ using Scaleway provider");
        Ok(Capabilities {
            store,
            compute: Arc::new(ScalewayCompute::new(scw.clone(), ssh.clone(), settings.reachability)?),
            dns: Arc::new(ScalewayDns::new(scw)?),
            notifier: Arc::new(SmtpNotifier::new(
                smtp,
                settings.base_domain.clone(),
                settings.export_link_ttl,
            )),
            exporter: Arc::new(SshExporter::new(ssh, bucket, settings.export_link_ttl)),
        })
    }
}
