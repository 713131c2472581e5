// Common test fixtures: the full router over an in-memory store and the mock cloud
#![allow(dead_code)]

use axum::Router;
use hubfleet_api::app::{create_cors, AppState};
use hubfleet_api::provider_manager::ProviderManager;
use hubfleet_api::routes::create_router;
use hubfleet_orchestrator::{MemoryStore, Orchestrator};
use hubfleet_providers::mock::MockCloud;
use std::sync::Arc;

pub struct TestApp {
    pub router: Router,
    pub orchestrator: Orchestrator,
    pub store: Arc<MemoryStore>,
    pub cloud: Arc<MockCloud>,
}

pub fn create_test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let cloud = MockCloud::new();
    let orchestrator = Orchestrator::new(ProviderManager::mock(store.clone(), cloud.clone()));
    let router = create_router()
        .layer(create_cors())
        .with_state(AppState::new(orchestrator.clone()));
    TestApp {
        router,
        orchestrator,
        store,
        cloud,
    }
}
