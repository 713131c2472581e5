use super::{CreateOutcome, InstanceStore, StateChange, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use hubfleet_common::{InstanceRecord, InstanceStatus, Machine, NewInstance, Secret};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    records: Vec<InstanceRecord>,
    history: Vec<StateChange>,
}

/// Process-local store for tests and `STORE=memory` runs. Enforces the same
/// uniqueness and transition rules as the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self, id: Uuid) -> Vec<StateChange> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .history
            .iter()
            .filter(|h| h.instance_id == id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn create_if_absent(&self, new: NewInstance) -> Result<CreateOutcome, StoreError> {
        Ok(self.with(|inner| {
            if let Some(existing) = inner.records.iter().find(|r| r.billing_id == new.billing_id) {
                return CreateOutcome::Existing(existing.clone());
            }
            if inner.records.iter().any(|r| r.slug == new.slug) {
                return CreateOutcome::SlugTaken;
            }
            let record = new.into_record(Uuid::new_v4(), Utc::now());
            inner.history.push(StateChange {
                instance_id: record.id,
                from: None,
                to: record.status,
                reason: "created".to_string(),
                at: record.created_at,
            });
            inner.records.push(record.clone());
            CreateOutcome::Inserted(record)
        }))
    }

    async fn find_by_billing_id(&self, billing_id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        Ok(self.with(|inner| {
            inner
                .records
                .iter()
                .find(|r| r.billing_id == billing_id)
                .cloned()
        }))
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<InstanceRecord>, StoreError> {
        Ok(self.with(|inner| inner.records.iter().find(|r| r.slug == slug).cloned()))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: InstanceStatus,
        reason: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.with(|inner| {
            let Some(record) = inner.records.iter_mut().find(|r| r.id == id) else {
                return false;
            };
            let from = record.status;
            if !from.can_transition_to(status) {
                return false;
            }
            record.status = status;
            inner.history.push(StateChange {
                instance_id: id,
                from: Some(from),
                to: status,
                reason: reason.to_string(),
                at: Utc::now(),
            });
            true
        }))
    }

    async fn update_machine(&self, id: Uuid, machine: &Machine) -> Result<(), StoreError> {
        self.with(|inner| {
            if let Some(record) = inner.records.iter_mut().find(|r| r.id == id) {
                record.machine = Some(machine.clone());
            }
        });
        Ok(())
    }

    async fn update_credential(&self, id: Uuid, credential: &Secret<String>) -> Result<bool, StoreError> {
        Ok(self.with(|inner| match inner.records.iter_mut().find(|r| r.id == id) {
            Some(record) if record.credential.is_none() => {
                record.credential = Some(credential.clone());
                true
            }
            _ => false,
        }))
    }
}
