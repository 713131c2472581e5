//! Tenant instance lifecycle: intake, provisioning and teardown sequences
//! over an injected set of collaborators.

pub mod credentials;
pub mod error;
pub mod orchestrator;
pub mod slug;
pub mod state_machine;
pub mod store;

pub use error::OrchestratorError;
pub use orchestrator::{CancelOutcome, Capabilities, CreateRequest, Intake, Orchestrator};
pub use store::{CreateOutcome, InstanceStore, MemoryStore, PgInstanceStore, StateChange, StoreError};
