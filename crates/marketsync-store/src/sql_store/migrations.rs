use crate::error::{StoreError, StoreResult};
use sqlx::{Executor, PgPool};
use tracing::info;

const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "001_initial_schema",
    include_str!("../../migrations/001_initial_schema.sql"),
)];

/// Database migration manager
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations, each in its own transaction
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let applied_versions: Vec<i64> =
            sqlx::query_scalar("SELECT version FROM _migrations ORDER BY version")
                .fetch_all(&self.pool)
                .await?;

        for (version, name, sql) in MIGRATIONS {
            if applied_versions.contains(version) {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            // Unparameterized execution goes through the simple query protocol,
            // which accepts the multi-statement script.
            (&mut *tx)
                .execute(*sql)
                .await
                .map_err(|e| StoreError::Migration(format!("{}: {}", name, e)))?;
            sqlx::query("INSERT INTO _migrations (version, name) VALUES ($1, $2)")
                .bind(version)
                .bind(name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            info!(version, name, "applied migration");
        }

        Ok(())
    }
}
