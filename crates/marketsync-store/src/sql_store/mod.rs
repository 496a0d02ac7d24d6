mod admin;
mod lease;
pub mod migrations;
mod tenant;

pub use admin::PgAdminStore;
pub use lease::PgLeaseStore;
pub use tenant::PgTenantStore;

use crate::error::StoreResult;
use crate::sql_store::migrations::MigrationRunner;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Postgres-backed store. The pool is shared; the administrative, tenant and
/// lease paths are handed out as distinct types so that cross-tenant access
/// is visible at the call site.
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: PgPool,
}

impl SqlStore {
    /// Connect, then run pending migrations
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        Self::new_with_config(database_url, None).await
    }

    pub async fn new_with_config(
        database_url: &str,
        max_connections: Option<u32>,
    ) -> StoreResult<Self> {
        let max_conn = max_connections.unwrap_or_else(|| {
            std::env::var("MARKETSYNC_DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10)
        });

        let pool = PgPoolOptions::new()
            .max_connections(max_conn)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create SqlStore from an existing pool, without migrating
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        MigrationRunner::new(self.pool.clone()).migrate().await
    }

    pub fn admin(&self) -> PgAdminStore {
        PgAdminStore::new(self.pool.clone())
    }

    pub fn tenant(&self) -> PgTenantStore {
        PgTenantStore::new(self.pool.clone())
    }

    pub fn leases(&self) -> PgLeaseStore {
        PgLeaseStore::new(self.pool.clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
