//! Mirakl marketplace adapter (operator hosted, e.g. Empik, Carrefour)

use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{
    advance_timestamp_cursor, lookup_status, parse_timestamp, pointer_str, raw_map,
    required_amount, OrderBatch,
};
use async_trait::async_trait;
use chrono::Utc;
use marketsync_core::{Address, Customer, LineItem, NormalizedOrder, OrderStatus, PaymentStatus};
use marketsync_registry::{
    InventorySync, MarketplaceProvider, MarketplaceRegistration, PollResult, ProviderError,
    ProviderResult,
};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

pub const NAME: &str = "mirakl";

const DEFAULT_PAGE_SIZE: u32 = 100;

const STATUS_TABLE: &[(&str, OrderStatus)] = &[
    ("STAGING", OrderStatus::Pending),
    ("WAITING_ACCEPTANCE", OrderStatus::Pending),
    ("WAITING_DEBIT", OrderStatus::Pending),
    ("WAITING_DEBIT_PAYMENT", OrderStatus::Pending),
    ("SHIPPING", OrderStatus::Confirmed),
    ("SHIPPED", OrderStatus::Shipped),
    ("TO_COLLECT", OrderStatus::Shipped),
    ("RECEIVED", OrderStatus::Delivered),
    ("CLOSED", OrderStatus::Delivered),
    ("REFUSED", OrderStatus::Cancelled),
    ("CANCELED", OrderStatus::Cancelled),
    ("INCIDENT_OPEN", OrderStatus::Shipped),
    ("REFUNDED", OrderStatus::Returned),
];

pub fn map_order_status(native: &str) -> Option<OrderStatus> {
    lookup_status(STATUS_TABLE, native)
}

pub fn registration(http: Client) -> MarketplaceRegistration {
    MarketplaceRegistration::new(NAME, move |credentials, settings| {
        let provider = MiraklProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn MarketplaceProvider>)
    })
}

#[derive(Deserialize)]
struct MiraklCredentials {
    api_key: String,
    shop_id: Option<String>,
}

pub struct MiraklProvider {
    api: ApiClient,
    credentials: MiraklCredentials,
    page_size: u32,
    page_delay: Option<Duration>,
}

impl MiraklProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: MiraklCredentials = parse_credentials(credentials, &["api_key"])?;
        let settings = ProviderSettings::from_value(settings)?;

        Ok(Self {
            api: ApiClient::new(http, settings.required_base_url()?, NAME),
            page_size: settings.page_size_or(DEFAULT_PAGE_SIZE),
            page_delay: settings.page_delay_ms.map(Duration::from_millis),
            credentials,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(AUTHORIZATION, &self.credentials.api_key);
        match &self.credentials.shop_id {
            Some(shop) => request.query(&[("shop_id", shop)]),
            None => request,
        }
    }
}

#[async_trait]
impl MarketplaceProvider for MiraklProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn poll_orders(&self, cursor: &str) -> ProviderResult<PollResult> {
        let mut offset = 0u32;
        let mut orders = OrderBatch::new();
        let mut latest = None;

        loop {
            let mut query = vec![
                ("max", self.page_size.to_string()),
                ("offset", offset.to_string()),
                ("sort", "dateCreated".to_string()),
            ];
            if !cursor.is_empty() {
                query.push(("start_update_date", cursor.to_string()));
            }

            let page: OrdersPage = self
                .api
                .json(self.authorized(self.api.get("/api/orders")).query(&query))
                .await?;
            let page_len = page.orders.len() as u32;

            for raw in page.orders {
                let updated =
                    pointer_str(&raw, "/last_updated_date").and_then(|s| parse_timestamp(&s));
                latest = latest.max(updated);
                orders.push(pointer_str(&raw, "/order_id"), normalize_order(raw));
            }

            offset += page_len;
            if page_len < self.page_size || offset >= page.total_count {
                break;
            }
            if let Some(delay) = self.page_delay {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(orders.finish(advance_timestamp_cursor(cursor, latest)))
    }

    async fn get_order(&self, external_id: &str) -> ProviderResult<NormalizedOrder> {
        let page: OrdersPage = self
            .api
            .json(
                self.authorized(self.api.get("/api/orders"))
                    .query(&[("order_ids", external_id)]),
            )
            .await?;
        let raw = page.orders.into_iter().next().ok_or_else(|| ProviderError::Api {
            status: 404,
            message: format!("order {} not found", external_id),
        })?;
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
impl InventorySync for MiraklProvider {
    async fn update_stock(&self, offer_id: &str, quantity: u32) -> ProviderResult<()> {
        let body = json!({"offers": [{
            "shop_sku": offer_id,
            "quantity": quantity,
            "update_delete": "update"
        }]});
        self.api
            .send(self.authorized(self.api.post("/api/offers")).json(&body))
            .await
    }

    async fn update_price(
        &self,
        offer_id: &str,
        price: Decimal,
        _currency: &str,
    ) -> ProviderResult<()> {
        let body = json!({"offers": [{
            "shop_sku": offer_id,
            "price": price.to_string(),
            "update_delete": "update"
        }]});
        self.api
            .send(self.authorized(self.api.post("/api/offers")).json(&body))
            .await
    }
}

#[derive(Debug, Deserialize)]
struct OrdersPage {
    #[serde(default)]
    orders: Vec<JsonValue>,
    #[serde(default)]
    total_count: u32,
}

#[derive(Debug, Deserialize)]
struct MiraklOrder {
    order_id: String,
    order_state: String,
    created_date: String,
    total_price: JsonValue,
    currency_iso_code: String,
    payment_type: Option<String>,
    customer: Option<JsonValue>,
    #[serde(default)]
    order_lines: Vec<MiraklLine>,
}

#[derive(Debug, Deserialize)]
struct MiraklLine {
    order_line_id: String,
    offer_sku: Option<String>,
    #[serde(default)]
    product_title: String,
    quantity: u32,
    price_unit: JsonValue,
}

fn mirakl_address(value: Option<&JsonValue>) -> Address {
    let value = value.cloned().unwrap_or(JsonValue::Null);
    let name = [
        pointer_str(&value, "/firstname"),
        pointer_str(&value, "/lastname"),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ");
    Address {
        name,
        company: pointer_str(&value, "/company"),
        street: pointer_str(&value, "/street_1").unwrap_or_default(),
        city: pointer_str(&value, "/city").unwrap_or_default(),
        postal_code: pointer_str(&value, "/zip_code").unwrap_or_default(),
        country_code: pointer_str(&value, "/country_iso_code").unwrap_or_default(),
        phone: pointer_str(&value, "/phone"),
    }
}

fn normalize_order(raw: JsonValue) -> ProviderResult<NormalizedOrder> {
    let order: MiraklOrder = serde_json::from_value(raw.clone())?;
    let customer = order.customer.unwrap_or(JsonValue::Null);

    let payment_status = match order.order_state.as_str() {
        "STAGING" | "WAITING_ACCEPTANCE" | "WAITING_DEBIT" | "WAITING_DEBIT_PAYMENT" => {
            PaymentStatus::Pending
        }
        "REFUNDED" => PaymentStatus::Refunded,
        "REFUSED" | "CANCELED" => PaymentStatus::Failed,
        _ => PaymentStatus::Paid,
    };

    let shipping_address = mirakl_address(customer.get("shipping_address"));
    let billing = customer.get("billing_address").map(|b| mirakl_address(Some(b)));
    let line_items = order
        .order_lines
        .iter()
        .map(|line| {
            Ok(LineItem {
                external_id: line.order_line_id.clone(),
                sku: line.offer_sku.clone(),
                name: line.product_title.clone(),
                quantity: line.quantity,
                unit_price: required_amount(&line.price_unit, "price_unit")?,
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;

    Ok(NormalizedOrder {
        external_id: order.order_id,
        external_status: order.order_state,
        customer: Customer {
            name: [pointer_str(&customer, "/firstname"), pointer_str(&customer, "/lastname")]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" "),
            email: pointer_str(&customer, "/email"),
            phone: shipping_address.phone.clone(),
        },
        shipping_address,
        billing_address: billing,
        line_items,
        total_amount: required_amount(&order.total_price, "total_price")?,
        currency: order.currency_iso_code,
        payment_status,
        payment_method: order.payment_type,
        ordered_at: parse_timestamp(&order.created_date).unwrap_or_else(Utc::now),
        provider_raw_data: raw_map(raw),
    })
}
