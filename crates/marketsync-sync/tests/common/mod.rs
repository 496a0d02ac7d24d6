#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use marketsync_core::{
    Address, Customer, IntegrationStatus, LabelFormat, NormalizedOrder, OrderStatus, PaymentStatus,
    ShipmentRequest, ShipmentResponse, ShipmentStatus, TenantIntegration, TrackableShipment,
    TrackingEvent,
};
use marketsync_registry::{
    CarrierProvider, CarrierRegistration, MarketplaceProvider, MarketplaceRegistration, PollResult,
    ProviderError, ProviderRegistry, ProviderResult, RefreshedTokens, RejectedOrder,
    TokenRefresher,
};
use marketsync_store::{CredentialVault, MemoryStore};
use marketsync_sync::SyncContext;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const MARKETPLACE: &str = "fakemarket";
pub const CARRIER: &str = "fakecarrier";

pub fn vault() -> CredentialVault {
    CredentialVault::new(&[7u8; 32]).expect("vault")
}

pub fn order(external_id: &str, status: &str) -> NormalizedOrder {
    let mut raw = Map::new();
    raw.insert("delivery_method".to_string(), json!("locker"));
    NormalizedOrder {
        external_id: external_id.to_string(),
        external_status: status.to_string(),
        customer: Customer { name: "Anna Nowak".to_string(), email: None, phone: None },
        shipping_address: Address::default(),
        billing_address: None,
        line_items: vec![],
        total_amount: Decimal::new(4999, 2),
        currency: "PLN".to_string(),
        payment_status: PaymentStatus::Paid,
        payment_method: None,
        ordered_at: Utc::now(),
        provider_raw_data: raw,
    }
}

/// Scripted order source keyed by the cursor the poller sends
#[derive(Default)]
pub struct OrderFeed {
    pages: Mutex<HashMap<String, PollResult>>,
    pub polls: AtomicUsize,
    pub refreshes: AtomicUsize,
}

impl OrderFeed {
    pub fn respond(&self, cursor: &str, orders: Vec<NormalizedOrder>, next: Option<&str>) {
        self.pages
            .lock()
            .expect("feed lock")
            .insert(cursor.to_string(), PollResult::new(orders, next.map(str::to_string)));
    }

    /// Like `respond`, with orders the adapter failed to decode
    pub fn respond_with_rejected(
        &self,
        cursor: &str,
        orders: Vec<NormalizedOrder>,
        rejected: &[&str],
        next: Option<&str>,
    ) {
        let rejected = rejected
            .iter()
            .map(|id| RejectedOrder {
                external_id: id.to_string(),
                error: ProviderError::Decode(format!("order {} has no total", id)),
            })
            .collect();
        let page = PollResult::new(orders, next.map(str::to_string)).with_rejected(rejected);
        self.pages.lock().expect("feed lock").insert(cursor.to_string(), page);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

struct FakeMarketplace {
    feed: Arc<OrderFeed>,
}

#[async_trait]
impl MarketplaceProvider for FakeMarketplace {
    fn name(&self) -> &str {
        MARKETPLACE
    }

    async fn poll_orders(&self, cursor: &str) -> ProviderResult<PollResult> {
        self.feed.polls.fetch_add(1, Ordering::SeqCst);
        let pages = self.feed.pages.lock().expect("feed lock");
        Ok(pages.get(cursor).cloned().unwrap_or_default())
    }

    async fn get_order(&self, external_id: &str) -> ProviderResult<NormalizedOrder> {
        Err(ProviderError::Api { status: 404, message: external_id.to_string() })
    }

    fn map_status(&self, native: &str) -> Option<OrderStatus> {
        match native {
            "NEW" => Some(OrderStatus::Pending),
            "PAID" => Some(OrderStatus::Confirmed),
            "SENT" => Some(OrderStatus::Shipped),
            _ => None,
        }
    }

    fn token_refresher(&self) -> Option<&dyn TokenRefresher> {
        Some(self)
    }
}

#[async_trait]
impl TokenRefresher for FakeMarketplace {
    async fn refresh_tokens(&self) -> ProviderResult<RefreshedTokens> {
        self.feed.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(RefreshedTokens {
            access_token: "fresh-access".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + ChronoDuration::hours(12),
        })
    }
}

/// Scripted tracking histories keyed by tracking number
#[derive(Default)]
pub struct TrackingFeed {
    histories: Mutex<HashMap<String, Vec<TrackingEvent>>>,
    pub builds: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl TrackingFeed {
    pub fn history(&self, tracking_number: &str, statuses: &[&str]) {
        let start = Utc::now() - ChronoDuration::days(2);
        let events = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| TrackingEvent {
                status: status.to_string(),
                description: None,
                location: None,
                occurred_at: start + ChronoDuration::hours(i as i64),
            })
            .collect();
        self.histories.lock().expect("feed lock").insert(tracking_number.to_string(), events);
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

struct FakeCarrier {
    feed: Arc<TrackingFeed>,
}

#[async_trait]
impl CarrierProvider for FakeCarrier {
    fn name(&self) -> &str {
        CARRIER
    }

    async fn create_shipment(&self, _request: &ShipmentRequest) -> ProviderResult<ShipmentResponse> {
        Err(ProviderError::not_supported(CARRIER, "create_shipment"))
    }

    async fn get_label(&self, _id: &str, _format: LabelFormat) -> ProviderResult<Vec<u8>> {
        Err(ProviderError::not_supported(CARRIER, "get_label"))
    }

    async fn get_tracking(&self, tracking_number: &str) -> ProviderResult<Vec<TrackingEvent>> {
        self.feed.fetches.fetch_add(1, Ordering::SeqCst);
        let histories = self.feed.histories.lock().expect("feed lock");
        histories
            .get(tracking_number)
            .cloned()
            .ok_or_else(|| ProviderError::Api { status: 404, message: tracking_number.to_string() })
    }

    async fn cancel_shipment(&self, _id: &str) -> ProviderResult<()> {
        Ok(())
    }

    fn map_status(&self, native: &str) -> Option<ShipmentStatus> {
        match native {
            "accepted" => Some(ShipmentStatus::PickedUp),
            "in_transit" => Some(ShipmentStatus::InTransit),
            "delivered" => Some(ShipmentStatus::Delivered),
            _ => None,
        }
    }
}

fn require_token(credentials: &JsonValue) -> ProviderResult<()> {
    match credentials.get("api_token").and_then(|v| v.as_str()) {
        Some(token) if !token.is_empty() => Ok(()),
        _ => Err(ProviderError::MissingCredential("api_token".to_string())),
    }
}

pub fn registry(orders: Arc<OrderFeed>, tracking: Arc<TrackingFeed>) -> Arc<ProviderRegistry> {
    let marketplace = MarketplaceRegistration::new(MARKETPLACE, move |credentials, _settings| {
        require_token(credentials)?;
        Ok(Box::new(FakeMarketplace { feed: orders.clone() }) as Box<dyn MarketplaceProvider>)
    })
    .refreshable();
    let carrier = CarrierRegistration::new(CARRIER, move |credentials, _settings| {
        require_token(credentials)?;
        tracking.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCarrier { feed: tracking.clone() }) as Box<dyn CarrierProvider>)
    });
    let registry = ProviderRegistry::from_registrations(vec![marketplace], vec![carrier]);
    Arc::new(registry.expect("registry"))
}

pub struct Harness {
    pub store: MemoryStore,
    pub orders: Arc<OrderFeed>,
    pub tracking: Arc<TrackingFeed>,
    pub ctx: SyncContext,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let orders = Arc::new(OrderFeed::default());
        let tracking = Arc::new(TrackingFeed::default());
        let ctx = SyncContext::new(
            registry(orders.clone(), tracking.clone()),
            vault(),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        );
        Self { store, orders, tracking, ctx }
    }

    pub fn seal(&self, credentials: JsonValue) -> String {
        self.ctx.vault.encrypt_json(&credentials).expect("encrypt")
    }

    pub async fn add_integration(
        &self,
        credentials: JsonValue,
        cursor: Option<&str>,
    ) -> TenantIntegration {
        let integration = TenantIntegration {
            integration_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            provider_name: MARKETPLACE.to_string(),
            status: IntegrationStatus::Active,
            encrypted_credentials: self.seal(credentials),
            settings: json!({}),
            sync_cursor: cursor.map(str::to_string),
            last_sync_at: None,
        };
        self.store.insert_integration(integration.clone()).await;
        integration
    }

    pub async fn add_shipment(
        &self,
        tracking_number: &str,
        status: ShipmentStatus,
        credentials: Option<String>,
    ) -> TrackableShipment {
        let shipment = TrackableShipment {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            provider: CARRIER.to_string(),
            tracking_number: tracking_number.to_string(),
            status,
            integration_id: None,
            integration_credentials: credentials,
            integration_settings: json!({}),
        };
        self.store.insert_shipment(shipment.clone()).await;
        shipment
    }
}
