//! Capability traits implemented by marketplace and carrier adapters

use crate::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketsync_core::{
    LabelFormat, NormalizedOrder, Offer, OrderStatus, PickupPoint, PickupPointQuery,
    ShipmentRequest, ShipmentResponse, ShipmentStatus, TrackingEvent,
};
use rust_decimal::Decimal;

/// One batch of orders returned by an incremental poll
#[derive(Debug, Clone, Default)]
pub struct PollResult {
    /// Orders in provider order
    pub orders: Vec<NormalizedOrder>,
    /// New cursor, or `None` when the provider gave no progress signal
    pub next_cursor: Option<String>,
    /// Orders in the batch that could not be decoded. The cursor still moves past them.
    pub rejected: Vec<RejectedOrder>,
}

impl PollResult {
    pub fn new(orders: Vec<NormalizedOrder>, next_cursor: Option<String>) -> Self {
        Self { orders, next_cursor, rejected: Vec::new() }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_rejected(mut self, rejected: Vec<RejectedOrder>) -> Self {
        self.rejected = rejected;
        self
    }
}

/// A raw order the adapter failed to normalize
#[derive(Debug, Clone)]
pub struct RejectedOrder {
    /// Provider order id, or `"<unknown>"` when the payload has none
    pub external_id: String,
    pub error: ProviderError,
}

/// Tokens issued by a refresh call
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Some providers rotate the refresh token, others keep the old one
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Marketplace adapter, built from one integration's credentials and settings
#[async_trait]
pub trait MarketplaceProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch every order newer than `cursor` (empty on first sync).
    ///
    /// Pagination and throttling stay inside the adapter.
    async fn poll_orders(&self, cursor: &str) -> ProviderResult<PollResult>;

    async fn get_order(&self, external_id: &str) -> ProviderResult<NormalizedOrder>;

    /// Native order status to canonical status
    fn map_status(&self, native: &str) -> Option<OrderStatus>;

    fn offers(&self) -> Option<&dyn OfferSync> {
        None
    }

    fn inventory(&self) -> Option<&dyn InventorySync> {
        None
    }

    fn token_refresher(&self) -> Option<&dyn TokenRefresher> {
        None
    }
}

/// Publishing offers to the marketplace catalogue
#[async_trait]
pub trait OfferSync: Send + Sync {
    /// Returns the marketplace's offer id
    async fn push_offer(&self, offer: &Offer) -> ProviderResult<String>;
}

#[async_trait]
pub trait InventorySync: Send + Sync {
    async fn update_stock(&self, offer_id: &str, quantity: u32) -> ProviderResult<()>;

    async fn update_price(&self, offer_id: &str, price: Decimal, currency: &str)
        -> ProviderResult<()>;
}

/// Refresh-token grant against the provider's token endpoint
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_tokens(&self) -> ProviderResult<RefreshedTokens>;
}

/// Carrier adapter, built from one integration's credentials and settings
#[async_trait]
pub trait CarrierProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn create_shipment(&self, request: &ShipmentRequest) -> ProviderResult<ShipmentResponse>;

    /// Label document bytes in the requested format
    async fn get_label(&self, shipment_id: &str, format: LabelFormat) -> ProviderResult<Vec<u8>>;

    /// Tracking events, oldest first
    async fn get_tracking(&self, tracking_number: &str) -> ProviderResult<Vec<TrackingEvent>>;

    async fn cancel_shipment(&self, shipment_id: &str) -> ProviderResult<()>;

    /// Native tracking status to canonical status
    fn map_status(&self, native: &str) -> Option<ShipmentStatus>;

    fn pickup_points(&self) -> Option<&dyn PickupPointSearch> {
        None
    }

    fn supports_pickup_points(&self) -> bool {
        self.pickup_points().is_some()
    }

    async fn search_pickup_points(
        &self,
        query: &PickupPointQuery,
    ) -> ProviderResult<Vec<PickupPoint>> {
        match self.pickup_points() {
            Some(search) => search.search_pickup_points(query).await,
            None => Err(ProviderError::not_supported(self.name(), "search_pickup_points")),
        }
    }
}

#[async_trait]
pub trait PickupPointSearch: Send + Sync {
    async fn search_pickup_points(&self, query: &PickupPointQuery)
        -> ProviderResult<Vec<PickupPoint>>;
}
