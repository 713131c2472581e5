use sqlx::{Pool, Postgres};

/// Apply the embedded migrations from `sqlx-migrations/` at the workspace root.
pub async fn run_migrations(pool: &Pool<Postgres>) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../sqlx-migrations").run(pool).await?;

    tracing::info!("📦 migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn embedded_migrations_create_both_tables() {
        let migrator = sqlx::migrate!("../sqlx-migrations");
        let sql: String = migrator.iter().map(|m| m.sql.as_ref()).collect();
        assert!(sql.contains("CREATE TABLE instances"));
        assert!(sql.contains("CREATE TABLE instance_state_history"));
    }
}
