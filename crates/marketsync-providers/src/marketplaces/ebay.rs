//! eBay Sell Fulfillment API adapter

use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{
    advance_timestamp_cursor, lookup_status, parse_timestamp, pointer_str, raw_map,
    required_amount, OrderBatch,
};
use crate::oauth::{refresh_access_token, ClientAuth, OAuthClientConfig};
use async_trait::async_trait;
use chrono::Utc;
use marketsync_core::{Address, Customer, LineItem, NormalizedOrder, OrderStatus, PaymentStatus};
use marketsync_registry::{
    InventorySync, MarketplaceProvider, MarketplaceRegistration, PollResult, ProviderError,
    ProviderResult, RefreshedTokens, TokenRefresher,
};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

pub const NAME: &str = "ebay";

const PRODUCTION_API: &str = "https://api.ebay.com";
const SANDBOX_API: &str = "https://api.sandbox.ebay.com";
const PRODUCTION_TOKEN_URL: &str = "https://api.ebay.com/identity/v1/oauth2/token";
const SANDBOX_TOKEN_URL: &str = "https://api.sandbox.ebay.com/identity/v1/oauth2/token";
const DEFAULT_PAGE_SIZE: u32 = 50;
const DEFAULT_MARKETPLACE: &str = "EBAY_PL";

const STATUS_TABLE: &[(&str, OrderStatus)] = &[
    ("NOT_STARTED", OrderStatus::Confirmed),
    ("IN_PROGRESS", OrderStatus::Confirmed),
    ("FULFILLED", OrderStatus::Shipped),
    ("CANCELED", OrderStatus::Cancelled),
    ("FULLY_REFUNDED", OrderStatus::Returned),
];

pub fn map_order_status(native: &str) -> Option<OrderStatus> {
    lookup_status(STATUS_TABLE, native)
}

pub fn registration(http: Client) -> MarketplaceRegistration {
    MarketplaceRegistration::new(NAME, move |credentials, settings| {
        let provider = EbayProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn MarketplaceProvider>)
    })
    .refreshable()
}

#[derive(Deserialize)]
struct EbayCredentials {
    client_id: String,
    client_secret: String,
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    sandbox: bool,
}

pub struct EbayProvider {
    api: ApiClient,
    credentials: EbayCredentials,
    oauth: OAuthClientConfig,
    marketplace: String,
    page_size: u32,
    page_delay: Option<Duration>,
}

impl EbayProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: EbayCredentials = parse_credentials(
            credentials,
            &["client_id", "client_secret", "access_token", "refresh_token"],
        )?;
        let mut settings = ProviderSettings::from_value(settings)?;
        settings.sandbox |= credentials.sandbox;

        Ok(Self {
            api: ApiClient::new(http.clone(), settings.base_url(PRODUCTION_API, SANDBOX_API), NAME),
            oauth: OAuthClientConfig::new(
                http.clone(),
                credentials.client_id.clone(),
                credentials.client_secret.clone(),
                settings.token_endpoint(PRODUCTION_TOKEN_URL, SANDBOX_TOKEN_URL),
                ClientAuth::BasicHeader,
            ),
            marketplace: settings
                .extra_str("marketplace_id")
                .unwrap_or(DEFAULT_MARKETPLACE)
                .to_string(),
            page_size: settings.page_size_or(DEFAULT_PAGE_SIZE),
            page_delay: settings.page_delay_ms.map(Duration::from_millis),
            credentials,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.credentials.access_token)
            .header("X-EBAY-C-MARKETPLACE-ID", &self.marketplace)
    }
}

#[async_trait]
impl MarketplaceProvider for EbayProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn poll_orders(&self, cursor: &str) -> ProviderResult<PollResult> {
        let mut offset = 0u32;
        let mut orders = OrderBatch::new();
        let mut latest = None;

        loop {
            let mut query = vec![
                ("limit", self.page_size.to_string()),
                ("offset", offset.to_string()),
            ];
            if !cursor.is_empty() {
                query.push(("filter", format!("lastmodifieddate:[{}..]", cursor)));
            }

            let page: OrdersPage = self
                .api
                .json(self.authorized(self.api.get("/sell/fulfillment/v1/order")).query(&query))
                .await?;
            let page_len = page.orders.len() as u32;

            for raw in page.orders {
                let modified =
                    pointer_str(&raw, "/lastModifiedDate").and_then(|s| parse_timestamp(&s));
                latest = latest.max(modified);
                orders.push(pointer_str(&raw, "/orderId"), normalize_order(raw));
            }

            offset += page_len;
            if page_len == 0 || page.next.is_none() || offset >= page.total {
                break;
            }
            if let Some(delay) = self.page_delay {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(orders.finish(advance_timestamp_cursor(cursor, latest)))
    }

    async fn get_order(&self, external_id: &str) -> ProviderResult<NormalizedOrder> {
        let raw: JsonValue = self
            .api
            .json(self.authorized(
                self.api.get(&format!("/sell/fulfillment/v1/order/{}", external_id)),
            ))
            .await?;
        normalize_order(raw)
    }

    fn map_status(&self, native: &str) -> Option<OrderStatus> {
        map_order_status(native)
    }

    fn inventory(&self) -> Option<&dyn InventorySync> {
        Some(self)
    }

    fn token_refresher(&self) -> Option<&dyn TokenRefresher> {
        Some(self)
    }
}

#[async_trait]
impl InventorySync for EbayProvider {
    async fn update_stock(&self, offer_id: &str, quantity: u32) -> ProviderResult<()> {
        let body = json!({"requests": [{
            "offers": [{"offerId": offer_id, "availableQuantity": quantity}]
        }]});
        self.api
            .send(
                self.authorized(self.api.post("/sell/inventory/v1/bulk_update_price_quantity"))
                    .json(&body),
            )
            .await
    }

    async fn update_price(
        &self,
        offer_id: &str,
        price: Decimal,
        currency: &str,
    ) -> ProviderResult<()> {
        let body = json!({"requests": [{
            "offers": [{
                "offerId": offer_id,
                "price": {"value": price.to_string(), "currency": currency}
            }]
        }]});
        self.api
            .send(
                self.authorized(self.api.post("/sell/inventory/v1/bulk_update_price_quantity"))
                    .json(&body),
            )
            .await
    }
}

#[async_trait]
impl TokenRefresher for EbayProvider {
    async fn refresh_tokens(&self) -> ProviderResult<RefreshedTokens> {
        refresh_access_token(&self.oauth, &self.credentials.refresh_token).await
    }
}

#[derive(Debug, Deserialize)]
struct OrdersPage {
    #[serde(default)]
    orders: Vec<JsonValue>,
    #[serde(default)]
    total: u32,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EbayOrder {
    order_id: String,
    order_fulfillment_status: String,
    order_payment_status: Option<String>,
    cancel_status: Option<CancelStatus>,
    creation_date: String,
    buyer: Option<Buyer>,
    pricing_summary: Option<PricingSummary>,
    #[serde(default)]
    line_items: Vec<EbayLineItem>,
    #[serde(default)]
    fulfillment_start_instructions: Vec<JsonValue>,
    payment_summary: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelStatus {
    cancel_state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Buyer {
    username: Option<String>,
    buyer_registration_address: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct PricingSummary {
    total: Option<Amount>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    value: JsonValue,
    currency: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EbayLineItem {
    line_item_id: String,
    sku: Option<String>,
    #[serde(default)]
    title: String,
    quantity: u32,
    line_item_cost: Option<Amount>,
}

fn normalize_order(raw: JsonValue) -> ProviderResult<NormalizedOrder> {
    let order: EbayOrder = serde_json::from_value(raw.clone())?;

    let cancelled = order
        .cancel_status
        .as_ref()
        .and_then(|c| c.cancel_state.as_deref())
        .is_some_and(|state| state == "CANCELED");
    let refunded = order.order_payment_status.as_deref() == Some("FULLY_REFUNDED");
    let external_status = if cancelled {
        "CANCELED".to_string()
    } else if refunded {
        "FULLY_REFUNDED".to_string()
    } else {
        order.order_fulfillment_status.clone()
    };

    let line_items = order
        .line_items
        .iter()
        .map(|item| {
            let line_total = required_amount(
                item.line_item_cost.as_ref().map_or(&JsonValue::Null, |c| &c.value),
                "lineItemCost",
            )?;
            let unit_price = if item.quantity > 0 {
                line_total / Decimal::from(item.quantity)
            } else {
                line_total
            };
            Ok(LineItem {
                external_id: item.line_item_id.clone(),
                sku: item.sku.clone(),
                name: item.title.clone(),
                quantity: item.quantity,
                unit_price,
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;

    let total = order
        .pricing_summary
        .as_ref()
        .and_then(|p| p.total.as_ref())
        .ok_or_else(|| ProviderError::Decode("order has no pricingSummary.total".to_string()))?;
    let total_amount = required_amount(&total.value, "pricingSummary.total")?;
    let currency = total.currency.clone();

    let ship_to = order
        .fulfillment_start_instructions
        .first()
        .and_then(|i| i.pointer("/shippingStep/shipTo"))
        .cloned()
        .unwrap_or(JsonValue::Null);
    let registration = order
        .buyer
        .as_ref()
        .and_then(|b| b.buyer_registration_address.clone())
        .unwrap_or(JsonValue::Null);

    let customer_name = pointer_str(&registration, "/fullName")
        .or_else(|| order.buyer.as_ref().and_then(|b| b.username.clone()))
        .unwrap_or_default();

    let payment_status = match order.order_payment_status.as_deref() {
        Some("PAID") => PaymentStatus::Paid,
        Some("FULLY_REFUNDED") | Some("PARTIALLY_REFUNDED") => PaymentStatus::Refunded,
        Some("FAILED") => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    };

    Ok(NormalizedOrder {
        external_id: order.order_id,
        external_status,
        customer: Customer {
            name: customer_name,
            email: pointer_str(&registration, "/email"),
            phone: pointer_str(&registration, "/primaryPhone/phoneNumber"),
        },
        shipping_address: Address {
            name: pointer_str(&ship_to, "/fullName").unwrap_or_default(),
            company: pointer_str(&ship_to, "/companyName"),
            street: pointer_str(&ship_to, "/contactAddress/addressLine1").unwrap_or_default(),
            city: pointer_str(&ship_to, "/contactAddress/city").unwrap_or_default(),
            postal_code: pointer_str(&ship_to, "/contactAddress/postalCode").unwrap_or_default(),
            country_code: pointer_str(&ship_to, "/contactAddress/countryCode").unwrap_or_default(),
            phone: pointer_str(&ship_to, "/primaryPhone/phoneNumber"),
        },
        billing_address: None,
        line_items,
        total_amount,
        currency,
        payment_status,
        payment_method: order
            .payment_summary
            .as_ref()
            .and_then(|p| pointer_str(p, "/payments/0/paymentMethod")),
        ordered_at: parse_timestamp(&order.creation_date).unwrap_or_else(Utc::now),
        provider_raw_data: raw_map(raw),
    })
}
