use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod poll;
pub mod secret;

pub use secret::Secret;

// --- Enums ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, utoipa::ToSchema)]
#[sqlx(type_name = "instance_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Provisioning, // Record persisted, machine being brought up
    Active,       // Provisioned and handed to the tenant
    Failed,       // A fatal provisioning step failed
    Cancelled,    // Tenant cancelled; teardown launched
}

impl InstanceStatus {
    pub const ALL: [InstanceStatus; 4] = [
        InstanceStatus::Provisioning,
        InstanceStatus::Active,
        InstanceStatus::Failed,
        InstanceStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Provisioning => "provisioning",
            InstanceStatus::Active => "active",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Cancelled => "cancelled",
        }
    }

    /// Legal moves: provisioning -> active | failed | cancelled, active -> cancelled.
    /// `failed` and `cancelled` are absorbing.
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        matches!(
            (self, next),
            (Provisioning, Active) | (Provisioning, Failed) | (Provisioning, Cancelled) | (Active, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Failed | InstanceStatus::Cancelled)
    }

    /// Statuses a record may be in for a move to `target` to be applied.
    pub fn predecessors(target: InstanceStatus) -> Vec<InstanceStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(target))
            .collect()
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Entities ---

/// Compute-provider handle for a launched machine. Identifier and address
/// always travel together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    pub machine_id: String,
    pub address: String,
}

/// One tenant instance, as persisted by the record store.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub id: Uuid,
    pub billing_id: String,
    pub subscription_id: Option<String>,
    pub email: String,
    pub slug: String,
    pub machine: Option<Machine>,
    /// Remote-access credential returned by the compute provider at launch.
    pub credential: Option<Secret<String>>,
    pub login_secret: Secret<String>,
    pub internal_secret: Secret<String>,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields fixed at intake time, before any machine exists.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub billing_id: String,
    pub subscription_id: Option<String>,
    pub email: String,
    pub slug: String,
    pub login_secret: Secret<String>,
    pub internal_secret: Secret<String>,
}

impl NewInstance {
    pub fn into_record(self, id: Uuid, created_at: DateTime<Utc>) -> InstanceRecord {
        InstanceRecord {
            id,
            billing_id: self.billing_id,
            subscription_id: self.subscription_id,
            email: self.email,
            slug: self.slug,
            machine: None,
            credential: None,
            login_secret: self.login_secret,
            internal_secret: self.internal_secret,
            status: InstanceStatus::Provisioning,
            created_at,
        }
    }
}

/// Tenant-facing projection of a record. Carries no secrets.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct InstanceView {
    pub id: Uuid,
    pub billing_id: String,
    pub subscription_id: Option<String>,
    pub slug: String,
    pub status: InstanceStatus,
    pub machine_id: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&InstanceRecord> for InstanceView {
    fn from(record: &InstanceRecord) -> Self {
        Self {
            id: record.id,
            billing_id: record.billing_id.clone(),
            subscription_id: record.subscription_id.clone(),
            slug: record.slug.clone(),
            status: record.status,
            machine_id: record.machine.as_ref().map(|m| m.machine_id.clone()),
            address: record.machine.as_ref().map(|m| m.address.clone()),
            created_at: record.created_at,
        }
    }
}
