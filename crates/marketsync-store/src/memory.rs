use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use marketsync_core::{
    store::{AdminStore, LeaseStore, TenantStore},
    CoreError, CoreResult, InsertOutcome, NewOrder, ShipmentStatus, TenantIntegration,
    TrackableShipment,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

type DedupKey = (Uuid, String, String);

#[derive(Debug, Default)]
struct MemoryState {
    integrations: Vec<TenantIntegration>,
    shipments: Vec<TrackableShipment>,
    orders: HashMap<DedupKey, NewOrder>,
    order_sequence: Vec<DedupKey>,
    leases: HashMap<String, (String, DateTime<Utc>)>,
    cursor_writes: usize,
    credential_writes: usize,
    shipment_writes: usize,
    /// External ids whose insert fails with a database error
    failing_inserts: HashSet<String>,
}

/// In-memory implementation of the admin, tenant and lease stores for tests
/// and dry runs. Write counters let tests assert idempotence.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_integration(&self, integration: TenantIntegration) {
        let mut state = self.state.write().await;
        state.integrations.retain(|i| i.integration_id != integration.integration_id);
        state.integrations.push(integration);
    }

    pub async fn integration(&self, integration_id: Uuid) -> Option<TenantIntegration> {
        let state = self.state.read().await;
        state.integrations.iter().find(|i| i.integration_id == integration_id).cloned()
    }

    pub async fn insert_shipment(&self, shipment: TrackableShipment) {
        let mut state = self.state.write().await;
        state.shipments.retain(|s| s.id != shipment.id);
        state.shipments.push(shipment);
    }

    pub async fn shipment(&self, shipment_id: Uuid) -> Option<TrackableShipment> {
        let state = self.state.read().await;
        state.shipments.iter().find(|s| s.id == shipment_id).cloned()
    }

    /// Persisted orders in insertion order
    pub async fn orders(&self) -> Vec<NewOrder> {
        let state = self.state.read().await;
        state.order_sequence.iter().filter_map(|key| state.orders.get(key).cloned()).collect()
    }

    pub async fn cursor_writes(&self) -> usize {
        self.state.read().await.cursor_writes
    }

    pub async fn credential_writes(&self) -> usize {
        self.state.read().await.credential_writes
    }

    pub async fn shipment_writes(&self) -> usize {
        self.state.read().await.shipment_writes
    }

    /// Make inserts of this external id fail until cleared
    pub async fn fail_inserts_for(&self, external_id: &str) {
        self.state.write().await.failing_inserts.insert(external_id.to_string());
    }

    pub async fn clear_insert_failures(&self) {
        self.state.write().await.failing_inserts.clear();
    }
}

#[async_trait]
impl AdminStore for MemoryStore {
    async fn list_active_integrations(&self, provider: &str) -> CoreResult<Vec<TenantIntegration>> {
        let state = self.state.read().await;
        Ok(state
            .integrations
            .iter()
            .filter(|i| i.provider_name == provider && i.is_active())
            .cloned()
            .collect())
    }

    async fn update_sync_cursor(
        &self,
        integration_id: Uuid,
        cursor: &str,
        synced_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let mut state = self.state.write().await;
        let integration = state
            .integrations
            .iter_mut()
            .find(|i| i.integration_id == integration_id)
            .ok_or_else(|| CoreError::NotFound(format!("integration {}", integration_id)))?;
        integration.sync_cursor = Some(cursor.to_string());
        integration.last_sync_at = Some(synced_at);
        state.cursor_writes += 1;
        Ok(())
    }

    async fn update_credentials(
        &self,
        integration_id: Uuid,
        encrypted_credentials: &str,
    ) -> CoreResult<()> {
        let mut state = self.state.write().await;
        let integration = state
            .integrations
            .iter_mut()
            .find(|i| i.integration_id == integration_id)
            .ok_or_else(|| CoreError::NotFound(format!("integration {}", integration_id)))?;
        integration.encrypted_credentials = encrypted_credentials.to_string();
        // Shipments carry a copy of their integration's blob.
        for shipment in state.shipments.iter_mut() {
            if shipment.integration_id == Some(integration_id) {
                shipment.integration_credentials = Some(encrypted_credentials.to_string());
            }
        }
        state.credential_writes += 1;
        Ok(())
    }

    async fn list_trackable_shipments(&self) -> CoreResult<Vec<TrackableShipment>> {
        let state = self.state.read().await;
        Ok(state
            .shipments
            .iter()
            .filter(|s| !s.tracking_number.is_empty() && !s.status.is_terminal())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn insert_order_if_absent(&self, order: &NewOrder) -> CoreResult<InsertOutcome> {
        let key = (order.tenant_id, order.source_provider.clone(), order.external_id.clone());
        let mut state = self.state.write().await;
        if state.failing_inserts.contains(&order.external_id) {
            return Err(CoreError::Db(format!("insert of order {} failed", order.external_id)));
        }
        if state.orders.contains_key(&key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        state.orders.insert(key.clone(), order.clone());
        state.order_sequence.push(key);
        Ok(InsertOutcome::Inserted)
    }

    async fn update_shipment_status(
        &self,
        tenant_id: Uuid,
        shipment_id: Uuid,
        status: ShipmentStatus,
    ) -> CoreResult<()> {
        let mut state = self.state.write().await;
        let shipment = state
            .shipments
            .iter_mut()
            .find(|s| s.id == shipment_id && s.tenant_id == tenant_id)
            .ok_or_else(|| CoreError::NotFound(format!("shipment {}", shipment_id)))?;
        shipment.status = status;
        state.shipment_writes += 1;
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> CoreResult<bool> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        match state.leases.get(name) {
            Some((current, expires_at)) if current != holder && *expires_at > now => Ok(false),
            _ => {
                state.leases.insert(name.to_string(), (holder.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn release(&self, name: &str, holder: &str) -> CoreResult<()> {
        let mut state = self.state.write().await;
        if matches!(state.leases.get(name), Some((current, _)) if current == holder) {
            state.leases.remove(name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsync_core::{
        Address, Customer, IntegrationStatus, OrderExtras, OrderStatus, PaymentStatus,
    };
    use rust_decimal::Decimal;
    use serde_json::json;

    fn integration(provider: &str, status: IntegrationStatus) -> TenantIntegration {
        TenantIntegration {
            integration_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            provider_name: provider.to_string(),
            status,
            encrypted_credentials: "blob".to_string(),
            settings: json!({}),
            sync_cursor: None,
            last_sync_at: None,
        }
    }

    fn order(tenant_id: Uuid, external_id: &str) -> NewOrder {
        NewOrder {
            id: Uuid::new_v4(),
            tenant_id,
            integration_id: Uuid::new_v4(),
            source_provider: "allegro".to_string(),
            external_id: external_id.to_string(),
            external_status: "READY_FOR_PROCESSING".to_string(),
            status: OrderStatus::Confirmed,
            customer: Customer::default(),
            shipping_address: Address::default(),
            billing_address: None,
            line_items: vec![],
            total_amount: Decimal::new(1999, 2),
            currency: "PLN".to_string(),
            payment_status: PaymentStatus::Paid,
            payment_method: None,
            ordered_at: Utc::now(),
            extras: OrderExtras::default(),
            raw_data: json!({}),
        }
    }

    #[tokio::test]
    async fn test_lists_only_active_integrations_of_provider() {
        let store = MemoryStore::new();
        store.insert_integration(integration("allegro", IntegrationStatus::Active)).await;
        store.insert_integration(integration("allegro", IntegrationStatus::Inactive)).await;
        store.insert_integration(integration("ebay", IntegrationStatus::Active)).await;

        let active = store.list_active_integrations("allegro").await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].is_active());
    }

    #[tokio::test]
    async fn test_dedup_key_is_per_tenant() {
        let store = MemoryStore::new();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();

        assert_eq!(store.insert_order_if_absent(&order(tenant_a, "1")).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            store.insert_order_if_absent(&order(tenant_a, "1")).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert_eq!(store.insert_order_if_absent(&order(tenant_b, "1")).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.orders().await.len(), 2);
    }

    #[tokio::test]
    async fn test_lease_exclusion_and_expiry() {
        let store = MemoryStore::new();
        assert!(store.try_acquire("order_poller:allegro", "a", Duration::seconds(60)).await.unwrap());
        assert!(!store.try_acquire("order_poller:allegro", "b", Duration::seconds(60)).await.unwrap());
        assert!(store.try_acquire("order_poller:allegro", "a", Duration::seconds(60)).await.unwrap());

        store.release("order_poller:allegro", "a").await.unwrap();
        assert!(store.try_acquire("order_poller:allegro", "b", Duration::seconds(60)).await.unwrap());

        assert!(store.try_acquire("expired", "a", Duration::seconds(-1)).await.unwrap());
        assert!(store.try_acquire("expired", "b", Duration::seconds(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_missing_integration_is_not_found() {
        let store = MemoryStore::new();
        let err = store.update_sync_cursor(Uuid::new_v4(), "c1", Utc::now()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_insert_failure_switch() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        store.fail_inserts_for("2").await;

        let err = store.insert_order_if_absent(&order(tenant, "2")).await.unwrap_err();
        assert!(matches!(err, CoreError::Db(_)));
        assert!(store.insert_order_if_absent(&order(tenant, "3")).await.is_ok());

        store.clear_insert_failures().await;
        assert_eq!(store.insert_order_if_absent(&order(tenant, "2")).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.orders().await.len(), 2);
    }
}
