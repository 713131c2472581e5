//! Record store: one row per tenant instance, keyed by billing id and by slug.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgInstanceStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hubfleet_common::{InstanceRecord, InstanceStatus, Machine, NewInstance, Secret};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt instance row {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

/// Result of [`InstanceStore::create_if_absent`].
#[derive(Debug)]
pub enum CreateOutcome {
    Inserted(InstanceRecord),
    /// A record with the same billing id already exists; it is returned unchanged.
    Existing(InstanceRecord),
    /// The slug was claimed by another record between the check and the insert.
    SlugTaken,
}

/// One applied status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub instance_id: Uuid,
    /// `None` for the row created at intake.
    pub from: Option<InstanceStatus>,
    pub to: InstanceStatus,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn create_if_absent(&self, new: NewInstance) -> Result<CreateOutcome, StoreError>;

    async fn find_by_billing_id(&self, billing_id: &str) -> Result<Option<InstanceRecord>, StoreError>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<InstanceRecord>, StoreError>;

    /// Moves the record to `status` if its current status allows it, and
    /// appends the transition to the history. Returns whether it applied.
    async fn update_status(
        &self,
        id: Uuid,
        status: InstanceStatus,
        reason: &str,
    ) -> Result<bool, StoreError>;

    /// Sets machine id and address together.
    async fn update_machine(&self, id: Uuid, machine: &Machine) -> Result<(), StoreError>;

    /// Write-once: returns `false` if a credential was already stored.
    async fn update_credential(&self, id: Uuid, credential: &Secret<String>) -> Result<bool, StoreError>;
}
