use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketsync_core::{
    AdminStore, CoreResult, IntegrationStatus, ShipmentStatus, TenantIntegration,
    TrackableShipment,
};
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

/// Administrative store. The pool's role must bypass row-level security.
#[derive(Debug, Clone)]
pub struct PgAdminStore {
    pool: PgPool,
}

impl PgAdminStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list_active(&self, provider: &str) -> StoreResult<Vec<TenantIntegration>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, provider_name, status, encrypted_credentials,
                   settings, sync_cursor, last_sync_at
            FROM tenant_integrations
            WHERE provider_name = $1 AND status = 'active'
            ORDER BY created_at
            "#,
        )
        .bind(provider)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_integration).collect()
    }

    async fn set_cursor(
        &self,
        integration_id: Uuid,
        cursor: &str,
        synced_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_integrations
            SET sync_cursor = $1, last_sync_at = $2, updated_at = now()
            WHERE id = $3
            "#,
        )
        .bind(cursor)
        .bind(synced_at)
        .bind(integration_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("integration {}", integration_id)));
        }
        Ok(())
    }

    async fn set_credentials(&self, integration_id: Uuid, encrypted: &str) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_integrations
            SET encrypted_credentials = $1, updated_at = now()
            WHERE id = $2
            "#,
        )
        .bind(encrypted)
        .bind(integration_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("integration {}", integration_id)));
        }
        Ok(())
    }

    async fn list_trackable(&self) -> StoreResult<Vec<TrackableShipment>> {
        let terminal: Vec<String> = ShipmentStatus::TERMINAL
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let rows = sqlx::query(
            r#"
            SELECT s.id, s.tenant_id, s.provider, s.tracking_number, s.status,
                   s.integration_id, ti.encrypted_credentials, ti.settings
            FROM shipments s
            LEFT JOIN tenant_integrations ti ON ti.id = s.integration_id
            WHERE s.tracking_number IS NOT NULL
              AND s.tracking_number <> ''
              AND s.status <> ALL($1)
            ORDER BY s.provider, s.created_at
            "#,
        )
        .bind(&terminal)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_shipment).collect()
    }
}

fn row_to_integration(row: &PgRow) -> StoreResult<TenantIntegration> {
    let status: String = row.try_get("status")?;
    Ok(TenantIntegration {
        integration_id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        provider_name: row.try_get("provider_name")?,
        status: status.parse::<IntegrationStatus>()?,
        encrypted_credentials: row.try_get("encrypted_credentials")?,
        settings: row.try_get::<JsonValue, _>("settings")?,
        sync_cursor: row.try_get("sync_cursor")?,
        last_sync_at: row.try_get("last_sync_at")?,
    })
}

fn row_to_shipment(row: &PgRow) -> StoreResult<TrackableShipment> {
    let status: String = row.try_get("status")?;
    Ok(TrackableShipment {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        provider: row.try_get("provider")?,
        tracking_number: row.try_get("tracking_number")?,
        status: status.parse::<ShipmentStatus>()?,
        integration_id: row.try_get("integration_id")?,
        integration_credentials: row.try_get("encrypted_credentials")?,
        integration_settings: row
            .try_get::<Option<JsonValue>, _>("settings")?
            .unwrap_or_else(|| JsonValue::Object(Default::default())),
    })
}

#[async_trait]
impl AdminStore for PgAdminStore {
    async fn list_active_integrations(&self, provider: &str) -> CoreResult<Vec<TenantIntegration>> {
        Ok(self.list_active(provider).await?)
    }

    async fn update_sync_cursor(
        &self,
        integration_id: Uuid,
        cursor: &str,
        synced_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        Ok(self.set_cursor(integration_id, cursor, synced_at).await?)
    }

    async fn update_credentials(
        &self,
        integration_id: Uuid,
        encrypted_credentials: &str,
    ) -> CoreResult<()> {
        Ok(self.set_credentials(integration_id, encrypted_credentials).await?)
    }

    async fn list_trackable_shipments(&self) -> CoreResult<Vec<TrackableShipment>> {
        Ok(self.list_trackable().await?)
    }
}
