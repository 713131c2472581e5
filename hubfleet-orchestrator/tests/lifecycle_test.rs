// Lifecycle scenarios against the in-memory store and the mock cloud.

mod common;

use async_trait::async_trait;
use common::{capabilities, harness, request};
use hubfleet_common::{InstanceRecord, InstanceStatus, Machine, NewInstance, Secret};
use hubfleet_orchestrator::{
    CancelOutcome, CreateOutcome, InstanceStore, Intake, MemoryStore, Orchestrator, OrchestratorError,
    StoreError,
};
use hubfleet_providers::mock::{MockCall, MockCloud, MockStep};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn status_of(store: &MemoryStore, slug: &str) -> InstanceStatus {
    store.find_by_slug(slug).await.unwrap().unwrap().status
}

#[tokio::test]
async fn test_create_provisions_to_active() {
    let h = harness();

    let intake = h.orchestrator.create(request("cus_1", "jane.doe@x.com")).await.unwrap();
    assert!(intake.is_new());
    assert_eq!(intake.record().slug, "jane-doe");
    assert_eq!(intake.record().status, InstanceStatus::Provisioning);
    assert!(intake.record().machine.is_none());

    h.orchestrator.wait_idle().await;

    let stored = h.store.find_by_slug("jane-doe").await.unwrap().unwrap();
    assert_eq!(stored.status, InstanceStatus::Active);
    assert_eq!(stored.subscription_id.as_deref(), Some("sub_cus_1"));
    assert_eq!(
        stored.machine,
        Some(Machine {
            machine_id: "mock-1".to_string(),
            address: "10.0.0.2".to_string()
        })
    );
    assert_eq!(stored.credential.as_ref().map(|c| c.expose().as_str()), Some("mock-ssh-key-1"));
    assert_eq!(stored.login_secret.expose().len(), 24);
    assert_eq!(stored.internal_secret.expose().len(), 48);

    assert_eq!(
        h.cloud.calls(),
        vec![
            MockCall::Launch { slug: "jane-doe".into() },
            MockCall::WaitUntilReachable {
                machine_id: "mock-1".into(),
                address: "10.0.0.2".into()
            },
            MockCall::Provision {
                machine_id: "mock-1".into(),
                slug: "jane-doe".into()
            },
            MockCall::UpsertDns {
                slug: "jane-doe".into(),
                address: "10.0.0.2".into()
            },
            MockCall::Welcome {
                email: "jane.doe@x.com".into(),
                slug: "jane-doe".into()
            },
        ]
    );

    let history: Vec<_> = h.store.history(stored.id).into_iter().map(|c| (c.from, c.to)).collect();
    assert_eq!(
        history,
        vec![
            (None, InstanceStatus::Provisioning),
            (Some(InstanceStatus::Provisioning), InstanceStatus::Active),
        ]
    );
}

#[tokio::test]
async fn test_second_tenant_with_same_local_part_gets_suffix() {
    let h = harness();

    let first = h.orchestrator.create(request("cus_1", "jane.doe@x.com")).await.unwrap();
    let second = h.orchestrator.create(request("cus_2", "jane.doe@y.com")).await.unwrap();
    let third = h.orchestrator.create(request("cus_3", "Jane_Doe@z.com")).await.unwrap();

    assert_eq!(first.record().slug, "jane-doe");
    assert_eq!(second.record().slug, "jane-doe-2");
    assert_eq!(third.record().slug, "jane-doe-3");

    h.orchestrator.wait_idle().await;
    for slug in ["jane-doe", "jane-doe-2", "jane-doe-3"] {
        assert_eq!(status_of(&h.store, slug).await, InstanceStatus::Active);
    }
}

#[tokio::test]
async fn test_create_is_idempotent_on_billing_id() {
    let h = harness();

    let first = h.orchestrator.create(request("cus_1", "jane@x.com")).await.unwrap();
    h.orchestrator.wait_idle().await;
    let calls_after_first = h.cloud.calls().len();

    let replay = h.orchestrator.create(request("cus_1", "someone.else@y.com")).await.unwrap();
    h.orchestrator.wait_idle().await;

    let Intake::Existing(existing) = replay else {
        panic!("replay must not create a new record");
    };
    assert_eq!(existing.id, first.record().id);
    assert_eq!(existing.slug, "jane");
    assert_eq!(existing.email, "jane@x.com");
    assert_eq!(existing.status, InstanceStatus::Active);
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.cloud.calls().len(), calls_after_first);
}

#[tokio::test]
async fn test_invalid_request_creates_nothing() {
    let h = harness();

    for (billing, email) in [("", "a@x.com"), ("cus_1", "not-an-email"), ("cus_1", "..@x.com")] {
        let err = h.orchestrator.create(request(billing, email)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)), "{err}");
    }
    assert!(h.store.is_empty());
    assert!(h.cloud.calls().is_empty());
}

#[tokio::test]
async fn test_launch_failure_marks_failed_without_dns_or_notification() {
    let h = harness();
    h.cloud.fail(MockStep::Launch);

    h.orchestrator.create(request("cus_1", "jane@x.com")).await.unwrap();
    h.orchestrator.wait_idle().await;

    let stored = h.store.find_by_slug("jane").await.unwrap().unwrap();
    assert_eq!(stored.status, InstanceStatus::Failed);
    assert!(stored.machine.is_none());
    assert_eq!(h.cloud.calls(), vec![MockCall::Launch { slug: "jane".into() }]);

    let history = h.store.history(stored.id);
    assert!(history.last().unwrap().reason.starts_with("launch:"));
}

#[tokio::test]
async fn test_reachability_failure_marks_failed() {
    let h = harness();
    h.cloud.fail(MockStep::Reachability);

    h.orchestrator.create(request("cus_1", "jane@x.com")).await.unwrap();
    h.orchestrator.wait_idle().await;

    assert_eq!(status_of(&h.store, "jane").await, InstanceStatus::Failed);
    assert_eq!(h.cloud.count(|c| matches!(c, MockCall::Provision { .. })), 0);
    assert_eq!(h.cloud.count(|c| matches!(c, MockCall::UpsertDns { .. })), 0);
}

#[tokio::test]
async fn test_provision_command_failure_marks_failed() {
    let h = harness();
    h.cloud.fail(MockStep::Provision);

    h.orchestrator.create(request("cus_1", "jane@x.com")).await.unwrap();
    h.orchestrator.wait_idle().await;

    let stored = h.store.find_by_slug("jane").await.unwrap().unwrap();
    assert_eq!(stored.status, InstanceStatus::Failed);
    assert!(stored.machine.is_some());
    assert_eq!(h.cloud.count(|c| matches!(c, MockCall::UpsertDns { .. })), 0);
    assert_eq!(h.cloud.count(|c| matches!(c, MockCall::Welcome { .. })), 0);
}

#[tokio::test]
async fn test_dns_failure_is_best_effort() {
    let h = harness();
    h.cloud.fail(MockStep::UpsertDns);

    h.orchestrator.create(request("cus_1", "jane.doe@x.com")).await.unwrap();
    h.orchestrator.wait_idle().await;

    assert_eq!(status_of(&h.store, "jane-doe").await, InstanceStatus::Active);
    assert_eq!(h.cloud.count(|c| matches!(c, MockCall::Welcome { .. })), 1);
}

#[tokio::test]
async fn test_welcome_failure_is_best_effort() {
    let h = harness();
    h.cloud.fail(MockStep::Welcome);

    h.orchestrator.create(request("cus_1", "jane@x.com")).await.unwrap();
    h.orchestrator.wait_idle().await;

    assert_eq!(status_of(&h.store, "jane").await, InstanceStatus::Active);
}

#[tokio::test]
async fn test_cancel_active_tears_down() {
    let h = harness();
    h.orchestrator.create(request("cus_1", "jane@x.com")).await.unwrap();
    h.orchestrator.wait_idle().await;

    let outcome = h.orchestrator.cancel("jane").await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Accepted(_)));
    assert_eq!(outcome.record().status, InstanceStatus::Cancelled);
    // Cancellation is committed before teardown runs.
    assert_eq!(status_of(&h.store, "jane").await, InstanceStatus::Cancelled);

    h.orchestrator.wait_idle().await;

    let teardown: Vec<_> = h.cloud.calls().into_iter().skip(5).collect();
    assert_eq!(
        teardown,
        vec![
            MockCall::Export {
                machine_id: "mock-1".into(),
                slug: "jane".into()
            },
            MockCall::ExportReady {
                email: "jane@x.com".into(),
                url: "https://exports.mock.invalid/jane.tar.gz".into()
            },
            MockCall::Terminate { machine_id: "mock-1".into() },
            MockCall::RemoveDns {
                slug: "jane".into(),
                address: "10.0.0.2".into()
            },
        ]
    );
}

#[tokio::test]
async fn test_export_failure_does_not_block_teardown() {
    let h = harness();
    h.orchestrator.create(request("cus_1", "jane@x.com")).await.unwrap();
    h.orchestrator.wait_idle().await;
    h.cloud.fail(MockStep::Export);
    h.cloud.fail(MockStep::Terminate);

    h.orchestrator.cancel("jane").await.unwrap();
    h.orchestrator.wait_idle().await;

    assert_eq!(status_of(&h.store, "jane").await, InstanceStatus::Cancelled);
    assert_eq!(h.cloud.count(|c| matches!(c, MockCall::ExportReady { .. })), 0);
    assert_eq!(h.cloud.count(|c| matches!(c, MockCall::Terminate { .. })), 1);
    assert_eq!(h.cloud.count(|c| matches!(c, MockCall::RemoveDns { .. })), 1);
}

#[tokio::test]
async fn test_cancel_twice_is_a_noop() {
    let h = harness();
    h.orchestrator.create(request("cus_1", "jane@x.com")).await.unwrap();
    h.orchestrator.wait_idle().await;

    h.orchestrator.cancel("jane").await.unwrap();
    h.orchestrator.wait_idle().await;
    let calls_after_first = h.cloud.calls().len();

    let second = h.orchestrator.cancel("jane").await.unwrap();
    h.orchestrator.wait_idle().await;

    assert!(matches!(second, CancelOutcome::AlreadyCancelled(_)));
    assert_eq!(second.record().status, InstanceStatus::Cancelled);
    assert_eq!(h.cloud.calls().len(), calls_after_first);
}

#[tokio::test]
async fn test_cancel_unknown_slug_is_not_found() {
    let h = harness();
    let err = h.orchestrator.cancel("nobody").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(ref s) if s == "nobody"));
    assert!(matches!(
        h.orchestrator.get("nobody").await,
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_failed_instance_keeps_status_and_terminates_machine() {
    let h = harness();
    h.cloud.fail(MockStep::Provision);
    h.orchestrator.create(request("cus_1", "jane@x.com")).await.unwrap();
    h.orchestrator.wait_idle().await;

    let outcome = h.orchestrator.cancel("jane").await.unwrap();
    h.orchestrator.wait_idle().await;

    assert!(matches!(outcome, CancelOutcome::Accepted(_)));
    assert_eq!(status_of(&h.store, "jane").await, InstanceStatus::Failed);
    assert_eq!(
        h.cloud.count(|c| matches!(c, MockCall::Terminate { machine_id } if machine_id == "mock-1")),
        1
    );
}

#[tokio::test]
async fn test_cancel_failed_launch_has_nothing_to_tear_down() {
    let h = harness();
    h.cloud.fail(MockStep::Launch);
    h.orchestrator.create(request("cus_1", "jane@x.com")).await.unwrap();
    h.orchestrator.wait_idle().await;

    h.orchestrator.cancel("jane").await.unwrap();
    h.orchestrator.wait_idle().await;

    assert_eq!(h.cloud.calls(), vec![MockCall::Launch { slug: "jane".into() }]);
}

#[tokio::test]
async fn test_shutdown_aborts_hung_reachability_wait() {
    let h = harness();
    h.cloud.fail(MockStep::ReachabilityHang);

    h.orchestrator.create(request("cus_1", "jane@x.com")).await.unwrap();
    tokio::task::yield_now().await;

    assert!(h.orchestrator.shutdown(Duration::from_secs(5)).await);
    assert_eq!(status_of(&h.store, "jane").await, InstanceStatus::Failed);
    assert_eq!(h.cloud.count(|c| matches!(c, MockCall::Provision { .. })), 0);
}

#[tokio::test]
async fn test_cancel_while_provisioning_stays_cancelled() {
    let h = harness();
    h.cloud.fail(MockStep::ReachabilityHang);

    h.orchestrator.create(request("cus_1", "jane@x.com")).await.unwrap();
    tokio::task::yield_now().await;

    let outcome = h.orchestrator.cancel("jane").await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Accepted(_)));
    assert_eq!(status_of(&h.store, "jane").await, InstanceStatus::Cancelled);

    // The stalled provisioning sequence is aborted and must not overwrite the cancel.
    assert!(h.orchestrator.shutdown(Duration::from_secs(5)).await);
    assert_eq!(status_of(&h.store, "jane").await, InstanceStatus::Cancelled);

    let id = h.store.find_by_slug("jane").await.unwrap().unwrap().id;
    let history = h.store.history(id);
    assert_eq!(history.last().map(|c| c.to), Some(InstanceStatus::Cancelled));
    assert!(history
        .iter()
        .all(|c| c.to != InstanceStatus::Failed && c.to != InstanceStatus::Active));
    assert_eq!(h.cloud.count(|c| matches!(c, MockCall::Provision { .. })), 0);
    assert_eq!(h.cloud.count(|c| matches!(c, MockCall::Welcome { .. })), 0);
}

/// Lets another intake claim the chosen slug between the free-slug check and
/// the insert, once.
struct RacyStore {
    inner: Arc<MemoryStore>,
    raced: AtomicBool,
}

#[async_trait]
impl InstanceStore for RacyStore {
    async fn create_if_absent(&self, new: NewInstance) -> Result<CreateOutcome, StoreError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let rival = NewInstance {
                billing_id: "cus_rival".to_string(),
                subscription_id: None,
                email: "rival@x.com".to_string(),
                slug: new.slug.clone(),
                login_secret: Secret::new("l".to_string()),
                internal_secret: Secret::new("i".to_string()),
            };
            self.inner.create_if_absent(rival).await?;
        }
        self.inner.create_if_absent(new).await
    }

    async fn find_by_billing_id(&self, billing_id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        self.inner.find_by_billing_id(billing_id).await
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<InstanceRecord>, StoreError> {
        self.inner.find_by_slug(slug).await
    }

    async fn update_status(&self, id: Uuid, status: InstanceStatus, reason: &str) -> Result<bool, StoreError> {
        self.inner.update_status(id, status, reason).await
    }

    async fn update_machine(&self, id: Uuid, machine: &Machine) -> Result<(), StoreError> {
        self.inner.update_machine(id, machine).await
    }

    async fn update_credential(&self, id: Uuid, credential: &Secret<String>) -> Result<bool, StoreError> {
        self.inner.update_credential(id, credential).await
    }
}

#[tokio::test]
async fn test_slug_claimed_concurrently_is_regenerated() {
    let memory = Arc::new(MemoryStore::new());
    let racy = Arc::new(RacyStore {
        inner: memory.clone(),
        raced: AtomicBool::new(false),
    });
    let cloud = MockCloud::new();
    let orchestrator = Orchestrator::new(capabilities(racy, cloud.clone()));

    let intake = orchestrator.create(request("cus_1", "jane.doe@x.com")).await.unwrap();
    orchestrator.wait_idle().await;

    assert!(intake.is_new());
    assert_eq!(intake.record().slug, "jane-doe-2");
    assert_eq!(memory.len(), 2);
    assert_eq!(status_of(&memory, "jane-doe-2").await, InstanceStatus::Active);
}
