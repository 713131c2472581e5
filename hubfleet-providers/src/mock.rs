use crate::{
    ComputeProvider, DnsProvider, Exporter, LaunchedMachine, MachineRef, Notifier, ProvisionParams,
};
use anyhow::Result;
use async_trait::async_trait;
use hubfleet_common::Secret;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Every collaborator call the mock observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Launch { slug: String },
    WaitUntilReachable { machine_id: String, address: String },
    Provision { machine_id: String, slug: String },
    Terminate { machine_id: String },
    UpsertDns { slug: String, address: String },
    RemoveDns { slug: String, address: String },
    Welcome { email: String, slug: String },
    ExportReady { email: String, url: String },
    Export { machine_id: String, slug: String },
}

/// Steps that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockStep {
    Launch,
    Reachability,
    /// Reachability never succeeds; the call only returns once cancelled.
    ReachabilityHang,
    Provision,
    Terminate,
    UpsertDns,
    RemoveDns,
    Welcome,
    ExportReady,
    Export,
}

/// In-memory stand-in for every external collaborator. Used by the test
/// suites and by `PROVIDER=mock` for local runs.
#[derive(Debug, Default)]
pub struct MockCloud {
    calls: Mutex<Vec<MockCall>>,
    failing: Mutex<HashSet<MockStep>>,
    seq: AtomicU32,
}

impl MockCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, step: MockStep) {
        self.failing.lock().unwrap().insert(step);
    }

    pub fn heal(&self, step: MockStep) {
        self.failing.lock().unwrap().remove(&step);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: MockCall) {
        tracing::debug!(?call, "mock collaborator call");
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, step: MockStep) -> Result<()> {
        if self.failing.lock().unwrap().contains(&step) {
            anyhow::bail!("mock {:?} failure", step);
        }
        Ok(())
    }

    fn is_failing(&self, step: MockStep) -> bool {
        self.failing.lock().unwrap().contains(&step)
    }
}

#[async_trait]
impl ComputeProvider for MockCloud {
    async fn launch(&self, slug: &str) -> Result<LaunchedMachine> {
        self.record(MockCall::Launch {
            slug: slug.to_string(),
        });
        self.check(MockStep::Launch)?;
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LaunchedMachine {
            machine_id: format!("mock-{n}"),
            address: format!("10.0.{}.{}", n / 250, n % 250 + 1),
            credential: Some(Secret::new(format!("mock-ssh-key-{n}"))),
        })
    }

    async fn wait_until_reachable(
        &self,
        machine_id: &str,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.record(MockCall::WaitUntilReachable {
            machine_id: machine_id.to_string(),
            address: address.to_string(),
        });
        if self.is_failing(MockStep::ReachabilityHang) {
            cancel.cancelled().await;
            anyhow::bail!("mock reachability wait cancelled");
        }
        self.check(MockStep::Reachability)
    }

    async fn run_provision_command(
        &self,
        machine: MachineRef<'_>,
        params: ProvisionParams<'_>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.record(MockCall::Provision {
            machine_id: machine.machine_id.to_string(),
            slug: params.slug.to_string(),
        });
        self.check(MockStep::Provision)
    }

    async fn terminate(&self, machine_id: &str) -> Result<()> {
        self.record(MockCall::Terminate {
            machine_id: machine_id.to_string(),
        });
        self.check(MockStep::Terminate)
    }
}

#[async_trait]
impl DnsProvider for MockCloud {
    async fn upsert_record(&self, slug: &str, address: &str) -> Result<()> {
        self.record(MockCall::UpsertDns {
            slug: slug.to_string(),
            address: address.to_string(),
        });
        self.check(MockStep::UpsertDns)
    }

    async fn remove_record(&self, slug: &str, address: &str) -> Result<()> {
        self.record(MockCall::RemoveDns {
            slug: slug.to_string(),
            address: address.to_string(),
        });
        self.check(MockStep::RemoveDns)
    }
}

#[async_trait]
impl Notifier for MockCloud {
    async fn send_welcome(&self, email: &str, slug: &str, _login_secret: &Secret<String>) -> Result<()> {
        self.record(MockCall::Welcome {
            email: email.to_string(),
            slug: slug.to_string(),
        });
        self.check(MockStep::Welcome)
    }

    async fn send_export_ready(&self, email: &str, download_url: &str) -> Result<()> {
        self.record(MockCall::ExportReady {
            email: email.to_string(),
            url: download_url.to_string(),
        });
        self.check(MockStep::ExportReady)
    }
}

#[async_trait]
impl Exporter for MockCloud {
    async fn export(
        &self,
        machine: MachineRef<'_>,
        slug: &str,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        self.record(MockCall::Export {
            machine_id: machine.machine_id.to_string(),
            slug: slug.to_string(),
        });
        self.check(MockStep::Export)?;
        Ok(format!("https://exports.mock.invalid/{slug}.tar.gz"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn launch_hands_out_distinct_machines() {
        let cloud = MockCloud::new();
        let a = cloud.launch("alpha").await.unwrap();
        let b = cloud.launch("beta").await.unwrap();
        assert_ne!(a.machine_id, b.machine_id);
        assert_ne!(a.address, b.address);
        assert!(a.credential.is_some());
    }

    #[tokio::test]
    async fn injected_failure_is_recorded_then_reported() {
        let cloud = MockCloud::new();
        cloud.fail(MockStep::UpsertDns);
        assert!(cloud.upsert_record("alpha", "10.0.0.1").await.is_err());
        assert_eq!(
            cloud.calls(),
            vec![MockCall::UpsertDns {
                slug: "alpha".into(),
                address: "10.0.0.1".into()
            }]
        );

        cloud.heal(MockStep::UpsertDns);
        assert!(cloud.upsert_record("alpha", "10.0.0.1").await.is_ok());
    }
}
