use crate::error::StoreResult;
use async_trait::async_trait;
use chrono::Duration;
use marketsync_core::{CoreResult, LeaseStore};
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn acquire(&self, name: &str, holder: &str, ttl: Duration) -> StoreResult<bool> {
        let ttl_secs = ttl.num_milliseconds() as f64 / 1000.0;
        // The update branch only fires for an expired lease or the current holder.
        let acquired: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO sync_leases (name, holder, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            ON CONFLICT (name) DO UPDATE
                SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
                WHERE sync_leases.expires_at < now() OR sync_leases.holder = EXCLUDED.holder
            RETURNING holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(ttl_secs)
        .fetch_optional(&self.pool)
        .await?;

        Ok(acquired.is_some())
    }

    async fn drop_lease(&self, name: &str, holder: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM sync_leases WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> CoreResult<bool> {
        Ok(self.acquire(name, holder, ttl).await?)
    }

    async fn release(&self, name: &str, holder: &str) -> CoreResult<()> {
        Ok(self.drop_lease(name, holder).await?)
    }
}
