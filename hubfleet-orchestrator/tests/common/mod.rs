// Shared fixtures: in-memory store plus the recording mock cloud.
#![allow(dead_code)]

use hubfleet_orchestrator::{Capabilities, CreateRequest, InstanceStore, MemoryStore, Orchestrator};
use hubfleet_providers::mock::MockCloud;
use std::sync::Arc;

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<MemoryStore>,
    pub cloud: Arc<MockCloud>,
}

pub fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()))
}

pub fn harness_with_store(store: Arc<MemoryStore>) -> Harness {
    let cloud = MockCloud::new();
    let orchestrator = Orchestrator::new(capabilities(store.clone(), cloud.clone()));
    Harness {
        orchestrator,
        store,
        cloud,
    }
}

pub fn capabilities(store: Arc<dyn InstanceStore>, cloud: Arc<MockCloud>) -> Capabilities {
    Capabilities {
        store,
        compute: cloud.clone(),
        dns: cloud.clone(),
        notifier: cloud.clone(),
        exporter: cloud,
    }
}

pub fn request(billing_id: &str, email: &str) -> CreateRequest {
    CreateRequest {
        billing_id: billing_id.to_string(),
        subscription_id: Some(format!("sub_{billing_id}")),
        email: email.to_string(),
    }
}
