//! WooCommerce REST API (v3) adapter.
//!
//! Orders are paged with `page`/`per_page`; the cursor is the highest
//! `date_modified_gmt` seen so far.

use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{
    advance_timestamp_cursor, join_name, json_id, lookup_status, parse_timestamp, raw_map,
    required_amount, OrderBatch,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketsync_core::{
    Address, Customer, LineItem, NormalizedOrder, OrderExtras, OrderStatus, PaymentStatus,
};
use marketsync_registry::{
    InventorySync, MarketplaceProvider, MarketplaceRegistration, PollResult, ProviderResult,
};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

pub const NAME: &str = "woocommerce";

const API_PREFIX: &str = "/wp-json/wc/v3";
const DEFAULT_PAGE_SIZE: u32 = 50;

const STATUS_TABLE: &[(&str, OrderStatus)] = &[
    ("pending", OrderStatus::Pending),
    ("on-hold", OrderStatus::Pending),
    ("processing", OrderStatus::Confirmed),
    ("completed", OrderStatus::Delivered),
    ("cancelled", OrderStatus::Cancelled),
    ("failed", OrderStatus::Cancelled),
    ("refunded", OrderStatus::Returned),
    ("checkout-draft", OrderStatus::Pending),
];

pub fn map_order_status(native: &str) -> Option<OrderStatus> {
    lookup_status(STATUS_TABLE, native)
}

/// Shipping method title and the customer's checkout note
pub fn map_order_extras(order: &NormalizedOrder) -> OrderExtras {
    let raw = &order.provider_raw_data;
    OrderExtras {
        delivery_method: raw
            .get("shipping_lines")
            .and_then(|lines| lines.get(0))
            .and_then(|line| line.get("method_title"))
            .and_then(|title| title.as_str())
            .map(str::to_string),
        pickup_point_id: None,
        fulfillment_channel: None,
        customer_note: raw
            .get("customer_note")
            .and_then(|note| note.as_str())
            .filter(|note| !note.trim().is_empty())
            .map(str::to_string),
    }
}

pub fn registration(http: Client) -> MarketplaceRegistration {
    MarketplaceRegistration::new(NAME, move |credentials, settings| {
        let provider = WooCommerceProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn MarketplaceProvider>)
    })
    .with_order_mapper(map_order_extras)
}

#[derive(Deserialize)]
struct WooCommerceCredentials {
    consumer_key: String,
    consumer_secret: String,
}

pub struct WooCommerceProvider {
    api: ApiClient,
    credentials: WooCommerceCredentials,
    page_size: u32,
    page_delay: Option<Duration>,
}

impl WooCommerceProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: WooCommerceCredentials =
            parse_credentials(credentials, &["consumer_key", "consumer_secret"])?;
        let settings = ProviderSettings::from_value(settings)?;
        let store_url = settings.required_base_url()?;

        Ok(Self {
            api: ApiClient::new(http, format!("{}{}", store_url, API_PREFIX), NAME),
            page_size: settings.page_size_or(DEFAULT_PAGE_SIZE),
            page_delay: settings.page_delay_ms.map(Duration::from_millis),
            credentials,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(
            &self.credentials.consumer_key,
            Some(&self.credentials.consumer_secret),
        )
    }
}

#[async_trait]
impl MarketplaceProvider for WooCommerceProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn poll_orders(&self, cursor: &str) -> ProviderResult<PollResult> {
        let mut page = 1u32;
        let mut orders = OrderBatch::new();
        let mut latest: Option<DateTime<Utc>> = None;

        loop {
            let mut query = vec![
                ("page", page.to_string()),
                ("per_page", self.page_size.to_string()),
                ("orderby", "modified".to_string()),
                ("order", "asc".to_string()),
            ];
            if !cursor.is_empty() {
                query.push(("modified_after", cursor.to_string()));
                query.push(("dates_are_gmt", "true".to_string()));
            }

            let batch: Vec<JsonValue> = self
                .api
                .json(self.authorized(self.api.get("/orders")).query(&query))
                .await?;
            let batch_len = batch.len() as u32;

            for raw in batch {
                let modified = raw
                    .get("date_modified_gmt")
                    .and_then(|v| v.as_str())
                    .and_then(parse_timestamp);
                latest = latest.max(modified);
                orders.push(json_id(&raw, "/id"), normalize_order(raw));
            }

            if batch_len < self.page_size {
                break;
            }
            page += 1;
            if let Some(delay) = self.page_delay {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(orders.finish(advance_timestamp_cursor(cursor, latest)))
    }

    async fn get_order(&self, external_id: &str) -> ProviderResult<NormalizedOrder> {
        let raw: JsonValue = self
            .api
            .json(self.authorized(self.api.get(&format!("/orders/{}", external_id))))
            .await?;
        normalize_order(raw)
    }

    fn map_status(&self, native: &str) -> Option<OrderStatus> {
        map_order_status(native)
    }

    fn inventory(&self) -> Option<&dyn InventorySync> {
        Some(self)
    }
}

#[async_trait]
impl InventorySync for WooCommerceProvider {
    async fn update_stock(&self, offer_id: &str, quantity: u32) -> ProviderResult<()> {
        let body = json!({"manage_stock": true, "stock_quantity": quantity});
        self.api
            .send(
                self.authorized(self.api.put(&format!("/products/{}", offer_id)))
                    .json(&body),
            )
            .await
    }

    async fn update_price(
        &self,
        offer_id: &str,
        price: Decimal,
        _currency: &str,
    ) -> ProviderResult<()> {
        let body = json!({"regular_price": price.to_string()});
        self.api
            .send(
                self.authorized(self.api.put(&format!("/products/{}", offer_id)))
                    .json(&body),
            )
            .await
    }
}

#[derive(Debug, Deserialize)]
struct WooOrder {
    id: u64,
    status: String,
    currency: String,
    total: String,
    date_created_gmt: Option<String>,
    date_paid_gmt: Option<String>,
    payment_method_title: Option<String>,
    billing: WooAddress,
    shipping: WooAddress,
    #[serde(default)]
    line_items: Vec<WooLineItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WooAddress {
    first_name: String,
    last_name: String,
    company: String,
    address_1: String,
    address_2: String,
    city: String,
    postcode: String,
    country: String,
    email: Option<String>,
    phone: Option<String>,
}

impl WooAddress {
    fn to_address(&self) -> Address {
        let street = join_name(Some(&self.address_1), Some(&self.address_2));
        Address {
            name: join_name(Some(&self.first_name), Some(&self.last_name)),
            company: Some(self.company.clone()).filter(|c| !c.trim().is_empty()),
            street,
            city: self.city.clone(),
            postal_code: self.postcode.clone(),
            country_code: self.country.clone(),
            phone: self.phone.clone().filter(|p| !p.trim().is_empty()),
        }
    }

    fn is_empty(&self) -> bool {
        self.address_1.trim().is_empty() && self.city.trim().is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct WooLineItem {
    id: u64,
    name: String,
    sku: Option<String>,
    quantity: u32,
    price: JsonValue,
}

fn normalize_order(raw: JsonValue) -> ProviderResult<NormalizedOrder> {
    let order: WooOrder = serde_json::from_value(raw.clone())?;

    let payment_status = match order.status.as_str() {
        "refunded" => PaymentStatus::Refunded,
        "failed" => PaymentStatus::Failed,
        _ if order.date_paid_gmt.is_some() => PaymentStatus::Paid,
        _ => PaymentStatus::Pending,
    };
    let shipping = if order.shipping.is_empty() {
        &order.billing
    } else {
        &order.shipping
    };
    let line_items = order
        .line_items
        .iter()
        .map(|item| {
            Ok(LineItem {
                external_id: item.id.to_string(),
                sku: item.sku.clone().filter(|s| !s.is_empty()),
                name: item.name.clone(),
                quantity: item.quantity,
                unit_price: required_amount(&item.price, "line_items.price")?,
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;

    Ok(NormalizedOrder {
        external_id: order.id.to_string(),
        external_status: order.status.clone(),
        customer: Customer {
            name: join_name(Some(&order.billing.first_name), Some(&order.billing.last_name)),
            email: order.billing.email.clone().filter(|e| !e.trim().is_empty()),
            phone: order.billing.phone.clone().filter(|p| !p.trim().is_empty()),
        },
        shipping_address: shipping.to_address(),
        billing_address: Some(order.billing.to_address()),
        line_items,
        total_amount: required_amount(&JsonValue::String(order.total.clone()), "total")?,
        currency: order.currency.clone(),
        payment_status,
        payment_method: order.payment_method_title.clone().filter(|m| !m.is_empty()),
        ordered_at: order
            .date_created_gmt
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now),
        provider_raw_data: raw_map(raw),
    })
}
