//! Erli shop API adapter. The cursor is the id of the last inbox message seen.

use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{
    from_minor_units, join_name, lookup_status, parse_timestamp, pointer_str, raw_map, OrderBatch,
};
use async_trait::async_trait;
use chrono::Utc;
use marketsync_core::{
    Address, Customer, LineItem, NormalizedOrder, OrderExtras, OrderStatus, PaymentStatus,
};
use marketsync_registry::{
    InventorySync, MarketplaceProvider, MarketplaceRegistration, PollResult, ProviderError,
    ProviderResult,
};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

pub const NAME: &str = "erli";

const PRODUCTION_API: &str = "https://erli.pl/svc/shop-api";
const SANDBOX_API: &str = "https://sandbox.erli.dev/svc/shop-api";
const DEFAULT_PAGE_SIZE: u32 = 100;

const STATUS_TABLE: &[(&str, OrderStatus)] = &[
    ("pending", OrderStatus::Pending),
    ("purchased", OrderStatus::Confirmed),
    ("readyToSend", OrderStatus::Confirmed),
    ("sent", OrderStatus::Shipped),
    ("delivered", OrderStatus::Delivered),
    ("cancelled", OrderStatus::Cancelled),
    ("returned", OrderStatus::Returned),
];

pub fn map_order_status(native: &str) -> Option<OrderStatus> {
    lookup_status(STATUS_TABLE, native)
}

pub fn map_order_extras(order: &NormalizedOrder) -> OrderExtras {
    let raw = JsonValue::Object(order.provider_raw_data.clone());
    OrderExtras {
        delivery_method: pointer_str(&raw, "/delivery/typeId"),
        pickup_point_id: pointer_str(&raw, "/delivery/pickupPlace/externalId"),
        fulfillment_channel: None,
        customer_note: pointer_str(&raw, "/comment"),
    }
}

pub fn registration(http: Client) -> MarketplaceRegistration {
    MarketplaceRegistration::new(NAME, move |credentials, settings| {
        let provider = ErliProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn MarketplaceProvider>)
    })
    .with_order_mapper(map_order_extras)
}

#[derive(Deserialize)]
struct ErliCredentials {
    api_key: String,
    #[serde(default)]
    sandbox: bool,
}

pub struct ErliProvider {
    api: ApiClient,
    credentials: ErliCredentials,
    page_size: u32,
    page_delay: Option<Duration>,
}

impl ErliProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: ErliCredentials = parse_credentials(credentials, &["api_key"])?;
        let mut settings = ProviderSettings::from_value(settings)?;
        settings.sandbox |= credentials.sandbox;

        Ok(Self {
            api: ApiClient::new(http, settings.base_url(PRODUCTION_API, SANDBOX_API), NAME),
            page_size: settings.page_size_or(DEFAULT_PAGE_SIZE),
            page_delay: settings.page_delay_ms.map(Duration::from_millis),
            credentials,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.credentials.api_key)
    }

    async fn fetch_inbox(&self, after: &str) -> ProviderResult<Vec<InboxMessage>> {
        let mut query = vec![("limit", self.page_size.to_string())];
        if !after.is_empty() {
            query.push(("afterId", after.to_string()));
        }
        self.api
            .json(self.authorized(self.api.get("/inbox")).query(&query))
            .await
    }
}

#[derive(Debug, Deserialize)]
struct InboxMessage {
    id: JsonValue,
    #[serde(rename = "type")]
    kind: String,
    payload: Option<JsonValue>,
}

impl InboxMessage {
    fn id(&self) -> String {
        match &self.id {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn order_id(&self) -> Option<String> {
        self.payload.as_ref().and_then(|p| pointer_str(p, "/id"))
    }
}

#[async_trait]
impl MarketplaceProvider for ErliProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn poll_orders(&self, cursor: &str) -> ProviderResult<PollResult> {
        let mut after = cursor.to_string();
        let mut seen = HashSet::new();
        let mut orders = OrderBatch::new();

        loop {
            let messages = self.fetch_inbox(&after).await?;
            let count = messages.len() as u32;

            for message in &messages {
                if !message.kind.starts_with("order") {
                    debug!(provider = NAME, kind = %message.kind, "ignoring inbox message");
                    continue;
                }
                if let Some(order_id) = message.order_id() {
                    if seen.insert(order_id.clone()) {
                        match self.get_order(&order_id).await {
                            Err(err) if !matches!(err, ProviderError::Decode(_)) => return Err(err),
                            result => orders.push(Some(order_id), result),
                        }
                    }
                }
            }

            if let Some(last) = messages.last() {
                after = last.id();
            }
            if count < self.page_size {
                break;
            }
            if let Some(delay) = self.page_delay {
                tokio::time::sleep(delay).await;
            }
        }

        let next_cursor = (after != cursor).then_some(after);
        Ok(orders.finish(next_cursor))
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
impl InventorySync for ErliProvider {
    async fn update_stock(&self, offer_id: &str, quantity: u32) -> ProviderResult<()> {
        self.api
            .send(
                self.authorized(self.api.patch(&format!("/products/{}", offer_id)))
                    .json(&json!({"stock": quantity})),
            )
            .await
    }

    async fn update_price(
        &self,
        offer_id: &str,
        price: Decimal,
        _currency: &str,
    ) -> ProviderResult<()> {
        self.api
            .send(
                self.authorized(self.api.patch(&format!("/products/{}", offer_id)))
                    .json(&json!({"price": crate::normalize::to_minor_units(price)})),
            )
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErliOrder {
    id: JsonValue,
    status: String,
    created: String,
    total_price: i64,
    user: Option<JsonValue>,
    #[serde(default)]
    items: Vec<ErliItem>,
    payment: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErliItem {
    id: JsonValue,
    external_id: Option<String>,
    #[serde(default)]
    name: String,
    quantity: u32,
    unit_price: i64,
}

fn json_id(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn normalize_order(raw: JsonValue) -> ProviderResult<NormalizedOrder> {
    let order: ErliOrder = serde_json::from_value(raw.clone())?;
    let user = order.user.unwrap_or(JsonValue::Null);
    let delivery = user.get("deliveryAddress").cloned().unwrap_or(JsonValue::Null);
    let invoice = user.get("invoiceAddress");

    let address_of = |value: &JsonValue| Address {
        name: join_name(
            value.get("firstName").and_then(|v| v.as_str()),
            value.get("lastName").and_then(|v| v.as_str()),
        ),
        company: pointer_str(value, "/companyName"),
        street: pointer_str(value, "/address").unwrap_or_default(),
        city: pointer_str(value, "/city").unwrap_or_default(),
        postal_code: pointer_str(value, "/zip").unwrap_or_default(),
        country_code: pointer_str(value, "/country").unwrap_or_else(|| "PL".to_string()),
        phone: pointer_str(value, "/phone"),
    };
    let shipping_address = address_of(&delivery);

    let payment_status = match order.status.as_str() {
        "pending" => PaymentStatus::Pending,
        "cancelled" => PaymentStatus::Failed,
        "returned" => PaymentStatus::Refunded,
        _ => PaymentStatus::Paid,
    };

    Ok(NormalizedOrder {
        external_id: json_id(&order.id),
        external_status: order.status.clone(),
        customer: Customer {
            name: shipping_address.name.clone(),
            email: pointer_str(&user, "/email"),
            phone: shipping_address.phone.clone(),
        },
        billing_address: invoice.map(address_of),
        shipping_address,
        line_items: order
            .items
            .iter()
            .map(|item| LineItem {
                external_id: json_id(&item.id),
                sku: item.external_id.clone(),
                name: item.name.clone(),
                quantity: item.quantity,
                unit_price: from_minor_units(item.unit_price),
            })
            .collect(),
        total_amount: from_minor_units(order.total_price),
        currency: "PLN".to_string(),
        payment_status,
        payment_method: order.payment.as_ref().and_then(|p| pointer_str(p, "/method")),
        ordered_at: parse_timestamp(&order.created).unwrap_or_else(Utc::now),
        provider_raw_data: raw_map(raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn erli_order(id: &str) -> JsonValue {
        json!({
            "id": id,
            "status": "purchased",
            "created": "2024-08-01T12:00:00.000Z",
            "totalPrice": 5998,
            "comment": "Prosze o szybka wysylke",
            "user": {
                "email": "kupujacy@example.pl",
                "deliveryAddress": {
                    "firstName": "Piotr",
                    "lastName": "Wisniewski",
                    "address": "Lipowa 7",
                    "zip": "80-001",
                    "city": "Gdansk",
                    "phone": "600700800"
                }
            },
            "delivery": {"typeId": "inpostParcelLocker", "pickupPlace": {"externalId": "GDA01M"}},
            "items": [{"id": 1, "externalId": "SKU-9", "name": "Lampka", "quantity": 2, "unitPrice": 2999}]
        })
    }

    #[test]
    fn test_normalize_and_extras() {
        let order = normalize_order(erli_order("ERL-1")).unwrap();
        assert_eq!(order.total_amount, Decimal::new(5998, 2));
        assert_eq!(order.line_items[0].unit_price, Decimal::new(2999, 2));
        assert_eq!(order.customer.name, "Piotr Wisniewski");

        let extras = map_order_extras(&order);
        assert_eq!(extras.pickup_point_id.as_deref(), Some("GDA01M"));
        assert_eq!(extras.delivery_method.as_deref(), Some("inpostParcelLocker"));
        assert_eq!(extras.customer_note.as_deref(), Some("Prosze o szybka wysylke"));
    }

    #[tokio::test]
    async fn test_inbox_cursor_is_last_message_id() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/inbox").query_param("afterId", "100");
                then.status(200).json_body(json!([
                    {"id": 101, "type": "orderCreated", "payload": {"id": "ERL-1"}},
                    {"id": 102, "type": "productUpdated", "payload": {"id": "P-1"}},
                    {"id": 103, "type": "orderStatusChanged", "payload": {"id": "ERL-1"}}
                ]));
            })
            .await;
        let order_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/orders/ERL-1");
                then.status(200).json_body(erli_order("ERL-1"));
            })
            .await;

        let provider = ErliProvider::from_config(
            Client::new(),
            &json!({"api_key": "key"}),
            &json!({"api_base_url": server.base_url()}),
        )
        .unwrap();

        let result = provider.poll_orders("100").await.unwrap();
        order_mock.assert_hits_async(1).await;
        assert_eq!(result.orders.len(), 1);
        assert_eq!(result.next_cursor.as_deref(), Some("103"));
    }

    #[test]
    fn test_status_table() {
        for (native, status) in STATUS_TABLE {
            assert_eq!(map_order_status(native), Some(*status));
        }
        assert_eq!(map_order_status("readyToSend"), Some(OrderStatus::Confirmed));
        assert_eq!(map_order_status("cancelled"), Some(OrderStatus::Cancelled));
        assert_eq!(map_order_status("returned"), Some(OrderStatus::Returned));
        assert_eq!(map_order_status("inDispute"), None);
        assert_eq!(map_order_status(""), None);
    }
}
