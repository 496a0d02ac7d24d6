//! Storage contracts used by the sync tasks.
//!
//! Access is split in two: [`AdminStore`] reads and writes integration-level
//! bookkeeping across all tenants, [`TenantStore`] performs business-data
//! writes inside a transaction bound to a single tenant.

use crate::error::CoreResult;
use crate::types::{InsertOutcome, NewOrder, ShipmentStatus, TenantIntegration, TrackableShipment};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Cross-tenant administrative access. Bypasses tenant isolation.
#[async_trait]
pub trait AdminStore: Send + Sync {
    /// Active integrations of one provider, across every tenant
    async fn list_active_integrations(&self, provider: &str) -> CoreResult<Vec<TenantIntegration>>;

    /// Persist a new cursor and the time of the sync that produced it
    async fn update_sync_cursor(
        &self,
        integration_id: Uuid,
        cursor: &str,
        synced_at: DateTime<Utc>,
    ) -> CoreResult<()>;

    /// Overwrite the stored vault blob
    async fn update_credentials(
        &self,
        integration_id: Uuid,
        encrypted_credentials: &str,
    ) -> CoreResult<()>;

    /// Shipments with a tracking number and a non-terminal status, across every tenant
    async fn list_trackable_shipments(&self) -> CoreResult<Vec<TrackableShipment>>;
}

/// Tenant-scoped business writes. Each call is one transaction.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Look the order up by its dedup key and insert it only when absent
    async fn insert_order_if_absent(&self, order: &NewOrder) -> CoreResult<InsertOutcome>;

    async fn update_shipment_status(
        &self,
        tenant_id: Uuid,
        shipment_id: Uuid,
        status: ShipmentStatus,
    ) -> CoreResult<()>;
}

/// Time-bounded named leases for running one task on a single instance
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Returns true when `holder` owns the lease after the call
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> CoreResult<bool>;

    async fn release(&self, name: &str, holder: &str) -> CoreResult<()>;
}
