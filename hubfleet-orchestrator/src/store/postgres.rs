use super::{CreateOutcome, InstanceStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hubfleet_common::{InstanceRecord, InstanceStatus, Machine, NewInstance, Secret};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

const SLUG_CONSTRAINT: &str = "instances_slug_key";

const INSTANCE_COLUMNS: &str = "id, billing_id, subscription_id, email, slug, machine_id, machine_address, \
     ssh_credential, login_secret, internal_secret, status, created_at";

#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: Uuid,
    billing_id: String,
    subscription_id: Option<String>,
    email: String,
    slug: String,
    machine_id: Option<String>,
    machine_address: Option<String>,
    ssh_credential: Option<String>,
    login_secret: String,
    internal_secret: String,
    status: InstanceStatus,
    created_at: DateTime<Utc>,
}

impl TryFrom<InstanceRow> for InstanceRecord {
    type Error = StoreError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        let machine = match (row.machine_id, row.machine_address) {
            (Some(machine_id), Some(address)) => Some(Machine { machine_id, address }),
            (None, None) => None,
            _ => {
                return Err(StoreError::Corrupt {
                    id: row.id,
                    reason: "machine_id and machine_address must be set together".to_string(),
                })
            }
        };
        Ok(InstanceRecord {
            id: row.id,
            billing_id: row.billing_id,
            subscription_id: row.subscription_id,
            email: row.email,
            slug: row.slug,
            machine,
            credential: row.ssh_credential.map(Secret::new),
            login_secret: Secret::new(row.login_secret),
            internal_secret: Secret::new(row.internal_secret),
            status: row.status,
            created_at: row.created_at,
        })
    }
}

pub struct PgInstanceStore {
    db: Pool<Postgres>,
}

impl PgInstanceStore {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<InstanceRecord>, StoreError> {
        let sql = format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE {column} = $1");
        let row: Option<InstanceRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        row.map(InstanceRecord::try_from).transpose()
    }
}

fn is_slug_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(SLUG_CONSTRAINT),
        _ => false,
    }
}

#[async_trait]
impl InstanceStore for PgInstanceStore {
    async fn create_if_absent(&self, new: NewInstance) -> Result<CreateOutcome, StoreError> {
        let mut tx = self.db.begin().await?;

        let sql = format!(
            "INSERT INTO instances (id, billing_id, subscription_id, email, slug, login_secret, internal_secret, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'provisioning', NOW())
             ON CONFLICT (billing_id) DO NOTHING
             RETURNING {INSTANCE_COLUMNS}"
        );
        let inserted: Result<Option<InstanceRow>, sqlx::Error> = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.billing_id)
            .bind(&new.subscription_id)
            .bind(&new.email)
            .bind(&new.slug)
            .bind(new.login_secret.expose())
            .bind(new.internal_secret.expose())
            .fetch_optional(&mut *tx)
            .await;

        let row = match inserted {
            Ok(Some(row)) => row,
            Ok(None) => {
                tx.rollback().await?;
                return match self.find_by_billing_id(&new.billing_id).await? {
                    Some(existing) => Ok(CreateOutcome::Existing(existing)),
                    None => Err(StoreError::Corrupt {
                        id: Uuid::nil(),
                        reason: format!("billing id {} conflicted but no row found", new.billing_id),
                    }),
                };
            }
            Err(e) if is_slug_violation(&e) => {
                tx.rollback().await?;
                return Ok(CreateOutcome::SlugTaken);
            }
            Err(e) => return Err(e.into()),
        };

        sqlx::query(
            "INSERT INTO instance_state_history (instance_id, from_status, to_status, reason)
             VALUES ($1, NULL, 'provisioning', 'created')",
        )
        .bind(row.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(CreateOutcome::Inserted(row.try_into()?))
    }

    async fn find_by_billing_id(&self, billing_id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        self.find_one("billing_id", billing_id).await
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<InstanceRecord>, StoreError> {
        self.find_one("slug", slug).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: InstanceStatus,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let mut tx = self.db.begin().await?;

        let current: Option<InstanceStatus> =
            sqlx::query_scalar("SELECT status FROM instances WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(from) = current else {
            tx.rollback().await?;
            return Ok(false);
        };
        if !from.can_transition_to(status) {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE instances SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO instance_state_history (instance_id, from_status, to_status, reason)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(from)
        .bind(status)
        .bind(reason)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn update_machine(&self, id: Uuid, machine: &Machine) -> Result<(), StoreError> {
        sqlx::query("UPDATE instances SET machine_id = $2, machine_address = $3 WHERE id = $1")
            .bind(id)
            .bind(&machine.machine_id)
            .bind(&machine.address)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn update_credential(&self, id: Uuid, credential: &Secret<String>) -> Result<bool, StoreError> {
        let res = sqlx::query(
            "UPDATE instances SET ssh_credential = $2 WHERE id = $1 AND ssh_credential IS NULL",
        )
        .bind(id)
        .bind(credential.expose())
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }
}
