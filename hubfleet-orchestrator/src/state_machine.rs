//! Status bookkeeping for the lifecycle sequences. Every move goes through the
//! store's guarded update, so a stale writer can never resurrect a terminal
//! record.

use crate::store::{InstanceStore, StoreError};
use hubfleet_common::{InstanceRecord, InstanceStatus};

async fn transition(
    store: &dyn InstanceStore,
    record: &InstanceRecord,
    to: InstanceStatus,
    reason: &str,
) -> Result<bool, StoreError> {
    let applied = store.update_status(record.id, to, reason).await?;
    if applied {
        tracing::info!(
            instance_id = %record.id,
            slug = %record.slug,
            to = %to,
            reason,
            "🔄 [state_machine] status updated"
        );
    } else {
        tracing::warn!(
            instance_id = %record.id,
            slug = %record.slug,
            to = %to,
            reason,
            "⚠️ [state_machine] transition not applied (record already moved on)"
        );
    }
    Ok(applied)
}

/// PROVISIONING -> ACTIVE once every fatal step succeeded.
pub async fn provisioning_to_active(store: &dyn InstanceStore, record: &InstanceRecord) -> Result<bool, StoreError> {
    transition(store, record, InstanceStatus::Active, "provisioning completed").await
}

/// PROVISIONING -> FAILED, recording which fatal step broke.
pub async fn provisioning_to_failed(
    store: &dyn InstanceStore,
    record: &InstanceRecord,
    step: &str,
    error: &str,
) -> Result<bool, StoreError> {
    let reason = format!("{step}: {error}");
    transition(store, record, InstanceStatus::Failed, &reason).await
}

/// PROVISIONING | ACTIVE -> CANCELLED.
pub async fn to_cancelled(store: &dyn InstanceStore, record: &InstanceRecord) -> Result<bool, StoreError> {
    transition(store, record, InstanceStatus::Cancelled, "cancellation requested").await
}
