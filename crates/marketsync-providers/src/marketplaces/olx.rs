//! OLX Partner API adapter.
//!
//! OLX exposes no change feed, so every poll re-reads the newest transactions
//! and the stored cursor is never advanced. Deduplication happens downstream.
//! A poll reads at most `max_pages` pages (default 10).

use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{
    json_id, lookup_status, parse_timestamp, pointer_str, raw_map, required_amount, OrderBatch,
};
use crate::oauth::{refresh_access_token, ClientAuth, OAuthClientConfig};
use async_trait::async_trait;
use chrono::Utc;
use marketsync_core::{Address, Customer, LineItem, NormalizedOrder, OrderStatus, PaymentStatus};
use marketsync_registry::{
    MarketplaceProvider, MarketplaceRegistration, PollResult, ProviderError, ProviderResult,
    RefreshedTokens, TokenRefresher,
};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

pub const NAME: &str = "olx";

const PRODUCTION_API: &str = "https://www.olx.pl/api/partner";
const PRODUCTION_TOKEN_URL: &str = "https://www.olx.pl/api/open/oauth/token";
const API_VERSION: &str = "2.0";
const DEFAULT_PAGE_SIZE: u32 = 50;
const DEFAULT_MAX_PAGES: u32 = 10;

const STATUS_TABLE: &[(&str, OrderStatus)] = &[
    ("new", OrderStatus::Pending),
    ("paid", OrderStatus::Confirmed),
    ("accepted", OrderStatus::Confirmed),
    ("sent", OrderStatus::Shipped),
    ("delivered", OrderStatus::Delivered),
    ("finished", OrderStatus::Delivered),
    ("cancelled", OrderStatus::Cancelled),
    ("rejected", OrderStatus::Cancelled),
    ("returned", OrderStatus::Returned),
];

pub fn map_order_status(native: &str) -> Option<OrderStatus> {
    lookup_status(STATUS_TABLE, native)
}

pub fn registration(http: Client) -> MarketplaceRegistration {
    MarketplaceRegistration::new(NAME, move |credentials, settings| {
        let provider = OlxProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn MarketplaceProvider>)
    })
    .refreshable()
}

#[derive(Deserialize)]
struct OlxCredentials {
    client_id: String,
    client_secret: String,
    access_token: String,
    refresh_token: String,
}

pub struct OlxProvider {
    api: ApiClient,
    credentials: OlxCredentials,
    oauth: OAuthClientConfig,
    page_size: u32,
    max_pages: u32,
    page_delay: Option<Duration>,
}

impl OlxProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: OlxCredentials = parse_credentials(
            credentials,
            &["client_id", "client_secret", "access_token", "refresh_token"],
        )?;
        let settings = ProviderSettings::from_value(settings)?;

        Ok(Self {
            api: ApiClient::new(
                http.clone(),
                settings.base_url(PRODUCTION_API, PRODUCTION_API),
                NAME,
            ),
            oauth: OAuthClientConfig::new(
                http.clone(),
                credentials.client_id.clone(),
                credentials.client_secret.clone(),
                settings.token_endpoint(PRODUCTION_TOKEN_URL, PRODUCTION_TOKEN_URL),
                ClientAuth::RequestBody,
            ),
            page_size: settings.page_size_or(DEFAULT_PAGE_SIZE),
            max_pages: settings.max_pages_or(DEFAULT_MAX_PAGES),
            page_delay: settings.page_delay_ms.map(Duration::from_millis),
            credentials,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.credentials.access_token)
            .header("Version", API_VERSION)
    }
}

#[async_trait]
impl MarketplaceProvider for OlxProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn poll_orders(&self, _cursor: &str) -> ProviderResult<PollResult> {
        let mut offset = 0u32;
        let mut pages = 0u32;
        let mut orders = OrderBatch::new();

        loop {
            let page: Envelope<Vec<JsonValue>> = self
                .api
                .json(self.authorized(self.api.get("/transactions")).query(&[
                    ("offset", offset.to_string()),
                    ("limit", self.page_size.to_string()),
                ]))
                .await?;
            let page_len = page.data.len() as u32;
            pages += 1;

            for raw in page.data {
                orders.push(json_id(&raw, "/id"), normalize_transaction(raw));
            }

            offset += page_len;
            if page_len < self.page_size {
                break;
            }
            if pages >= self.max_pages {
                warn!(
                    provider = NAME,
                    pages,
                    transactions = orders.len(),
                    "Transaction list truncated at max_pages"
                );
                break;
            }
            if let Some(delay) = self.page_delay {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(orders.finish(None))
    }

    async fn get_order(&self, external_id: &str) -> ProviderResult<NormalizedOrder> {
        let envelope: Envelope<JsonValue> = self
            .api
            .json(self.authorized(self.api.get(&format!("/transactions/{}", external_id))))
            .await?;
        normalize_transaction(envelope.data)
    }

    fn map_status(&self, native: &str) -> Option<OrderStatus> {
        map_order_status(native)
    }

    fn token_refresher(&self) -> Option<&dyn TokenRefresher> {
        Some(self)
    }
}

#[async_trait]
impl TokenRefresher for OlxProvider {
    async fn refresh_tokens(&self) -> ProviderResult<RefreshedTokens> {
        refresh_access_token(&self.oauth, &self.credentials.refresh_token).await
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct OlxTransaction {
    status: String,
    created_at: String,
    advert: Option<JsonValue>,
    buyer: Option<JsonValue>,
    delivery: Option<JsonValue>,
    price: Option<OlxPrice>,
    #[serde(default = "default_quantity")]
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct OlxPrice {
    value: JsonValue,
    currency: String,
}

fn default_quantity() -> u32 {
    1
}

fn normalize_transaction(raw: JsonValue) -> ProviderResult<NormalizedOrder> {
    let tx: OlxTransaction = serde_json::from_value(raw.clone())?;
    let external_id = json_id(&raw, "/id")
        .ok_or_else(|| ProviderError::Decode("transaction has no id".to_string()))?;
    let buyer = tx.buyer.unwrap_or(JsonValue::Null);
    let delivery = tx.delivery.unwrap_or(JsonValue::Null);
    let advert = tx.advert.unwrap_or(JsonValue::Null);

    let price = tx
        .price
        .as_ref()
        .ok_or_else(|| ProviderError::Decode("transaction has no price".to_string()))?;
    let total_amount = required_amount(&price.value, "price.value")?;
    let currency = price.currency.clone();
    let unit_price = if tx.quantity > 0 {
        total_amount / rust_decimal::Decimal::from(tx.quantity)
    } else {
        total_amount
    };

    let payment_status = match tx.status.as_str() {
        "new" => PaymentStatus::Pending,
        "cancelled" | "rejected" => PaymentStatus::Failed,
        "returned" => PaymentStatus::Refunded,
        _ => PaymentStatus::Paid,
    };

    Ok(NormalizedOrder {
        external_status: tx.status,
        customer: Customer {
            name: pointer_str(&buyer, "/name").unwrap_or_default(),
            email: pointer_str(&buyer, "/email"),
            phone: pointer_str(&buyer, "/phone"),
        },
        shipping_address: Address {
            name: pointer_str(&delivery, "/address/name")
                .or_else(|| pointer_str(&buyer, "/name"))
                .unwrap_or_default(),
            company: None,
            street: pointer_str(&delivery, "/address/street").unwrap_or_default(),
            city: pointer_str(&delivery, "/address/city").unwrap_or_default(),
            postal_code: pointer_str(&delivery, "/address/postcode").unwrap_or_default(),
            country_code: pointer_str(&delivery, "/address/country")
                .unwrap_or_else(|| "PL".to_string()),
            phone: pointer_str(&buyer, "/phone"),
        },
        billing_address: None,
        line_items: vec![LineItem {
            external_id: pointer_str(&advert, "/id").unwrap_or_else(|| external_id.clone()),
            sku: pointer_str(&advert, "/external_id"),
            name: pointer_str(&advert, "/title").unwrap_or_default(),
            quantity: tx.quantity,
            unit_price,
        }],
        external_id,
        total_amount,
        currency,
        payment_status,
        payment_method: pointer_str(&delivery, "/operator"),
        ordered_at: parse_timestamp(&tx.created_at).unwrap_or_else(Utc::now),
        provider_raw_data: raw_map(raw),
    })
}
