use crate::error::OrchestratorError;
use crate::store::{CreateOutcome, InstanceStore};
use crate::{credentials, slug, state_machine};
use hubfleet_common::{InstanceRecord, InstanceStatus, Machine, NewInstance};
use hubfleet_providers::{ComputeProvider, DnsProvider, Exporter, MachineRef, Notifier, ProvisionParams};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// Attempts at inserting a record when a concurrent intake grabs the slug first.
pub const MAX_SLUG_ATTEMPTS: usize = 5;

/// Everything the orchestrator talks to, built once at startup.
#[derive(Clone)]
pub struct Capabilities {
    pub store: Arc<dyn InstanceStore>,
    pub compute: Arc<dyn ComputeProvider>,
    pub dns: Arc<dyn DnsProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub exporter: Arc<dyn Exporter>,
}

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub billing_id: String,
    pub subscription_id: Option<String>,
    pub email: String,
}

impl CreateRequest {
    /// Normalised copy plus the slug base, or the reason the request is unusable.
    fn validate(&self) -> Result<(CreateRequest, String), OrchestratorError> {
        let billing_id = self.billing_id.trim();
        if billing_id.is_empty() {
            return Err(OrchestratorError::InvalidRequest("billing_id must not be empty".into()));
        }

        let email = self.email.trim();
        let mut parts = email.split('@');
        let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) => (local, domain),
            _ => {
                return Err(OrchestratorError::InvalidRequest(
                    "email must contain exactly one '@'".into(),
                ))
            }
        };
        if local.is_empty() || domain.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "email must have a local part and a domain".into(),
            ));
        }
        let base = slug::slug_base(email).ok_or_else(|| {
            OrchestratorError::InvalidRequest("email local part yields an empty slug".into())
        })?;

        let subscription_id = self
            .subscription_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok((
            CreateRequest {
                billing_id: billing_id.to_string(),
                subscription_id,
                email: email.to_string(),
            },
            base,
        ))
    }
}

#[derive(Debug)]
pub enum Intake {
    /// New record persisted in `provisioning`; the sequence runs in the background.
    Accepted(InstanceRecord),
    /// Replay of a billing id we already know; nothing was started.
    Existing(InstanceRecord),
}

impl Intake {
    pub fn record(&self) -> &InstanceRecord {
        match self {
            Intake::Accepted(r) | Intake::Existing(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Intake::Accepted(_))
    }
}

#[derive(Debug)]
pub enum CancelOutcome {
    /// Teardown launched.
    Accepted(InstanceRecord),
    /// Already cancelled; no side effects.
    AlreadyCancelled(InstanceRecord),
}

impl CancelOutcome {
    pub fn record(&self) -> &InstanceRecord {
        match self {
            CancelOutcome::Accepted(r) | CancelOutcome::AlreadyCancelled(r) => r,
        }
    }
}

/// Drives instances through their lifecycle. Cheap to clone; clones share
/// the same capabilities, shutdown signal and task set.
#[derive(Clone)]
pub struct Orchestrator {
    caps: Capabilities,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Orchestrator {
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn create(&self, request: CreateRequest) -> Result<Intake, OrchestratorError> {
        let (request, base) = request.validate()?;
        let store = &self.caps.store;

        if let Some(existing) = store.find_by_billing_id(&request.billing_id).await? {
            tracing::info!(
                billing_id = %request.billing_id,
                slug = %existing.slug,
                "ℹ️ create replay: returning existing instance"
            );
            return Ok(Intake::Existing(existing));
        }

        let login_secret = credentials::login_secret();
        let internal_secret = credentials::internal_secret();

        for attempt in 1..=MAX_SLUG_ATTEMPTS {
            let candidate = slug::unique_slug(&base, |candidate| {
                let store = store.clone();
                async move { Ok::<_, OrchestratorError>(store.find_by_slug(&candidate).await?.is_some()) }
            })
            .await?
            .ok_or_else(|| OrchestratorError::SlugExhausted(base.clone()))?;

            let new = NewInstance {
                billing_id: request.billing_id.clone(),
                subscription_id: request.subscription_id.clone(),
                email: request.email.clone(),
                slug: candidate.clone(),
                login_secret: login_secret.clone(),
                internal_secret: internal_secret.clone(),
            };

            match store.create_if_absent(new).await? {
                CreateOutcome::Inserted(record) => {
                    tracing::info!(
                        instance_id = %record.id,
                        slug = %record.slug,
                        billing_id = %record.billing_id,
                        "🚀 instance accepted, provisioning in background"
                    );
                    self.spawn_provision(record.clone());
                    return Ok(Intake::Accepted(record));
                }
                CreateOutcome::Existing(record) => {
                    tracing::info!(slug = %record.slug, "ℹ️ concurrent create won the billing id");
                    return Ok(Intake::Existing(record));
                }
                CreateOutcome::SlugTaken => {
                    tracing::warn!(slug = %candidate, attempt, "⚠️ slug claimed concurrently, regenerating");
                }
            }
        }

        Err(OrchestratorError::SlugExhausted(base))
    }

    pub async fn get(&self, slug: &str) -> Result<InstanceRecord, OrchestratorError> {
        self.caps
            .store
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(slug.to_string()))
    }

    pub async fn cancel(&self, slug: &str) -> Result<CancelOutcome, OrchestratorError> {
        let mut record = self.get(slug).await?;

        match record.status {
            InstanceStatus::Cancelled => {
                tracing::info!(slug, "ℹ️ cancel replay: already cancelled");
                return Ok(CancelOutcome::AlreadyCancelled(record));
            }
            InstanceStatus::Failed => {
                tracing::info!(slug, "🧹 cancel on failed instance: tearing down, status stays failed");
            }
            InstanceStatus::Provisioning | InstanceStatus::Active => {
                if state_machine::to_cancelled(self.caps.store.as_ref(), &record).await? {
                    record.status = InstanceStatus::Cancelled;
                } else {
                    // Lost a race with another status write; act on what is stored now.
                    record = self.get(slug).await?;
                    if record.status == InstanceStatus::Cancelled {
                        return Ok(CancelOutcome::AlreadyCancelled(record));
                    }
                }
            }
        }

        self.spawn_deprovision(record.clone());
        Ok(CancelOutcome::Accepted(record))
    }

    /// Waits for every sequence spawned so far. Intended for tests and tooling.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Signals running sequences to abort their waits, then gives them up to
    /// `grace` to record their outcome. Returns whether all of them finished.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        tracing::info!(in_flight = self.tasks.len(), "🛑 orchestrator shutting down");
        self.shutdown.cancel();
        self.tasks.close();
        match tokio::time::timeout(grace, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(in_flight = self.tasks.len(), "⚠️ shutdown grace elapsed with sequences still running");
                false
            }
        }
    }

    fn spawn_provision(&self, record: InstanceRecord) {
        let span = tracing::info_span!("provision", instance_id = %record.id, slug = %record.slug);
        let this = self.clone();
        self.tasks.spawn(async move { this.provision(record).await }.instrument(span));
    }

    fn spawn_deprovision(&self, record: InstanceRecord) {
        let span = tracing::info_span!("deprovision", instance_id = %record.id, slug = %record.slug);
        let this = self.clone();
        self.tasks.spawn(async move { this.deprovision(record).await }.instrument(span));
    }

    async fn fail(&self, record: &InstanceRecord, step: &str, error: &anyhow::Error) {
        tracing::error!(step, error = %format!("{error:#}"), "❌ fatal provisioning step failed");
        if let Err(e) =
            state_machine::provisioning_to_failed(self.caps.store.as_ref(), record, step, &format!("{error:#}")).await
        {
            tracing::error!(step, error = %e, "❌ could not record failed status");
        }
    }

    /// Launch, reachability and the provisioning command are fatal; DNS and
    /// the welcome message are best-effort. Never returns an error.
    async fn provision(&self, record: InstanceRecord) {
        let caps = &self.caps;

        // 1. Launch
        let launched = match caps.compute.launch(&record.slug).await {
            Ok(m) => m,
            Err(e) => return self.fail(&record, "launch", &e).await,
        };
        let machine = Machine {
            machine_id: launched.machine_id.clone(),
            address: launched.address.clone(),
        };
        tracing::info!(machine_id = %machine.machine_id, address = %machine.address, "✅ machine launched");

        let persisted = async {
            caps.store.update_machine(record.id, &machine).await?;
            if let Some(credential) = &launched.credential {
                caps.store.update_credential(record.id, credential).await?;
            }
            Ok::<_, crate::store::StoreError>(())
        }
        .await;
        if let Err(e) = persisted {
            let err = anyhow::Error::new(e);
            self.fail(&record, "persist_machine", &err).await;
            if let Err(e) = caps.compute.terminate(&machine.machine_id).await {
                tracing::warn!(machine_id = %machine.machine_id, error = %format!("{e:#}"), "⚠️ could not terminate untracked machine");
            }
            return;
        }

        // 2. Reachability
        if let Err(e) = caps
            .compute
            .wait_until_reachable(&machine.machine_id, &machine.address, &self.shutdown)
            .await
        {
            return self.fail(&record, "reachability", &e).await;
        }
        tracing::info!("✅ machine reachable");

        // 3. Remote provisioning command
        let machine_ref = MachineRef {
            machine_id: &machine.machine_id,
            address: &machine.address,
            credential: launched.credential.as_ref(),
        };
        let params = ProvisionParams {
            slug: &record.slug,
            login_secret: &record.login_secret,
            internal_secret: &record.internal_secret,
        };
        if let Err(e) = caps
            .compute
            .run_provision_command(machine_ref, params, &self.shutdown)
            .await
        {
            return self.fail(&record, "provision_command", &e).await;
        }
        tracing::info!("✅ provisioning command completed");

        // 4. DNS (best-effort)
        if let Err(e) = caps.dns.upsert_record(&record.slug, &machine.address).await {
            tracing::warn!(step = "dns_upsert", error = %format!("{e:#}"), "⚠️ best-effort step failed");
        }

        // 5. Welcome (best-effort)
        if let Err(e) = caps
            .notifier
            .send_welcome(&record.email, &record.slug, &record.login_secret)
            .await
        {
            tracing::warn!(step = "welcome", error = %format!("{e:#}"), "⚠️ best-effort step failed");
        }

        // 6. Active
        match state_machine::provisioning_to_active(caps.store.as_ref(), &record).await {
            Ok(true) => tracing::info!("🎉 instance active"),
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, "❌ could not record active status"),
        }
    }

    /// Export, terminate and DNS removal, all best-effort.
    async fn deprovision(&self, record: InstanceRecord) {
        let caps = &self.caps;

        let Some(machine) = record.machine.as_ref() else {
            tracing::info!("ℹ️ no machine recorded, nothing to tear down");
            return;
        };
        let machine_ref = MachineRef {
            machine_id: &machine.machine_id,
            address: &machine.address,
            credential: record.credential.as_ref(),
        };

        // 1. Export + link (best-effort)
        match caps.exporter.export(machine_ref, &record.slug, &self.shutdown).await {
            Ok(url) if url.is_empty() => {
                tracing::warn!(step = "export", "⚠️ export produced no download link");
            }
            Ok(url) => {
                tracing::info!("✅ data export uploaded");
                if let Err(e) = caps.notifier.send_export_ready(&record.email, &url).await {
                    tracing::warn!(step = "export_notify", error = %format!("{e:#}"), "⚠️ best-effort step failed");
                }
            }
            Err(e) => {
                tracing::warn!(step = "export", error = %format!("{e:#}"), "⚠️ best-effort step failed");
            }
        }

        // 2. Terminate (best-effort)
        match caps.compute.terminate(&machine.machine_id).await {
            Ok(()) => tracing::info!(machine_id = %machine.machine_id, "✅ machine terminated"),
            Err(e) => tracing::warn!(
                step = "terminate",
                machine_id = %machine.machine_id,
                error = %format!("{e:#}"),
                "⚠️ best-effort step failed, machine may be orphaned"
            ),
        }

        // 3. DNS removal (best-effort)
        if let Err(e) = caps.dns.remove_record(&record.slug, &machine.address).await {
            tracing::warn!(step = "dns_remove", error = %format!("{e:#}"), "⚠️ best-effort step failed");
        }

        tracing::info!("🧹 teardown finished");
    }
}
