//! Amazon Selling Partner API adapter.
//!
//! Access tokens come from a Login with Amazon refresh-token exchange and are
//! cached for the adapter's lifetime. Orders are paged with `NextToken`, with a
//! fixed pause between calls to stay under the Orders API rate limit.

use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{
    advance_timestamp_cursor, format_timestamp, parse_timestamp, pointer_str, raw_map,
    required_amount, OrderBatch,
};
use crate::oauth::{refresh_access_token, ClientAuth, OAuthClientConfig, TokenCache};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
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
use std::time::Duration;

pub const NAME: &str = "amazon";

const PRODUCTION_API: &str = "https://sellingpartnerapi-eu.amazon.com";
const SANDBOX_API: &str = "https://sandbox.sellingpartnerapi-eu.amazon.com";
const LWA_TOKEN_URL: &str = "https://api.amazon.com/auth/o2/token";
const DEFAULT_MARKETPLACE_ID: &str = "A1C3SOZRARQ6R3";
const DEFAULT_PAGE_DELAY_MS: u64 = 1000;
const INITIAL_LOOKBACK_DAYS: i64 = 30;
const ACCESS_TOKEN_HEADER: &str = "x-amz-access-token";

const STATUS_TABLE: &[(&str, OrderStatus)] = &[
    ("Pending", OrderStatus::Pending),
    ("PendingAvailability", OrderStatus::Pending),
    ("Unshipped", OrderStatus::Confirmed),
    ("PartiallyShipped", OrderStatus::Confirmed),
    ("Shipped", OrderStatus::Shipped),
    ("InvoiceUnconfirmed", OrderStatus::Shipped),
    ("Canceled", OrderStatus::Cancelled),
    ("Unfulfillable", OrderStatus::Cancelled),
];

pub fn map_order_status(native: &str) -> Option<OrderStatus> {
    crate::normalize::lookup_status(STATUS_TABLE, native)
}

pub fn map_order_extras(order: &NormalizedOrder) -> OrderExtras {
    let raw = JsonValue::Object(order.provider_raw_data.clone());
    OrderExtras {
        delivery_method: pointer_str(&raw, "/ShipmentServiceLevelCategory"),
        pickup_point_id: None,
        fulfillment_channel: pointer_str(&raw, "/FulfillmentChannel"),
        customer_note: None,
    }
}

pub fn registration(http: Client) -> MarketplaceRegistration {
    MarketplaceRegistration::new(NAME, move |credentials, settings| {
        let provider = AmazonProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn MarketplaceProvider>)
    })
    .with_order_mapper(map_order_extras)
}

#[derive(Deserialize)]
struct AmazonCredentials {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    marketplace_id: Option<String>,
    seller_id: Option<String>,
    #[serde(default)]
    sandbox: bool,
}

pub struct AmazonProvider {
    api: ApiClient,
    lwa: OAuthClientConfig,
    refresh_token: String,
    tokens: TokenCache,
    marketplace_id: String,
    seller_id: Option<String>,
    page_delay: Duration,
}

impl AmazonProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: AmazonCredentials =
            parse_credentials(credentials, &["client_id", "client_secret", "refresh_token"])?;
        let mut settings = ProviderSettings::from_value(settings)?;
        settings.sandbox |= credentials.sandbox;

        let marketplace_id = credentials
            .marketplace_id
            .clone()
            .or_else(|| settings.extra_str("marketplace_id").map(str::to_string))
            .unwrap_or_else(|| DEFAULT_MARKETPLACE_ID.to_string());

        Ok(Self {
            api: ApiClient::new(http.clone(), settings.base_url(PRODUCTION_API, SANDBOX_API), NAME),
            lwa: OAuthClientConfig::new(
                http.clone(),
                credentials.client_id,
                credentials.client_secret,
                settings.token_endpoint(LWA_TOKEN_URL, LWA_TOKEN_URL),
                ClientAuth::RequestBody,
            ),
            refresh_token: credentials.refresh_token,
            tokens: TokenCache::new(),
            marketplace_id,
            seller_id: credentials.seller_id,
            page_delay: Duration::from_millis(
                settings.page_delay_ms.unwrap_or(DEFAULT_PAGE_DELAY_MS),
            ),
        })
    }

    async fn access_token(&self) -> ProviderResult<String> {
        self.tokens
            .get_or_fetch(|| refresh_access_token(&self.lwa, &self.refresh_token))
            .await
    }

    async fn authorized(&self, request: RequestBuilder) -> ProviderResult<RequestBuilder> {
        let token = self.access_token().await?;
        Ok(request.header(ACCESS_TOKEN_HEADER, token))
    }

    async fn pause(&self) {
        if !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
    }

    async fn fetch_order_items(&self, order_id: &str) -> ProviderResult<Vec<JsonValue>> {
        let request = self
            .authorized(self.api.get(&format!("/orders/v0/orders/{}/orderItems", order_id)))
            .await?;
        let response: ItemsResponse = self.api.json(request).await?;
        Ok(response.payload.order_items)
    }

    async fn with_items(&self, mut order: JsonValue) -> ProviderResult<NormalizedOrder> {
        let order_id = pointer_str(&order, "/AmazonOrderId")
            .ok_or_else(|| ProviderError::Decode("order without AmazonOrderId".to_string()))?;
        let items = self.fetch_order_items(&order_id).await?;
        if let Some(object) = order.as_object_mut() {
            object.insert("OrderItems".to_string(), JsonValue::Array(items));
        }
        normalize_order(order)
    }
}

#[async_trait]
impl MarketplaceProvider for AmazonProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn poll_orders(&self, cursor: &str) -> ProviderResult<PollResult> {
        let mut query: Vec<(&str, String)> = vec![("MarketplaceIds", self.marketplace_id.clone())];
        if cursor.is_empty() {
            let since = Utc::now() - ChronoDuration::days(INITIAL_LOOKBACK_DAYS);
            query.push(("CreatedAfter", format_timestamp(since)));
        } else {
            query.push(("LastUpdatedAfter", cursor.to_string()));
        }

        let mut orders = OrderBatch::new();
        let mut latest = None;

        loop {
            let request = self.authorized(self.api.get("/orders/v0/orders").query(&query)).await?;
            let page: OrdersResponse = self.api.json(request).await?;

            for raw in page.payload.orders {
                let updated = pointer_str(&raw, "/LastUpdateDate").and_then(|s| parse_timestamp(&s));
                latest = latest.max(updated);
                self.pause().await;
                let external_id = pointer_str(&raw, "/AmazonOrderId");
                // item fetch failures abort the poll; bad payloads only skip the order
                match self.with_items(raw).await {
                    Err(err) if !matches!(err, ProviderError::Decode(_)) => return Err(err),
                    result => orders.push(external_id, result),
                }
            }

            match page.payload.next_token {
                Some(token) if !token.is_empty() => {
                    query = vec![
                        ("MarketplaceIds", self.marketplace_id.clone()),
                        ("NextToken", token),
                    ];
                    self.pause().await;
                }
                _ => break,
            }
        }

        Ok(orders.finish(advance_timestamp_cursor(cursor, latest)))
    }

    async fn get_order(&self, external_id: &str) -> ProviderResult<NormalizedOrder> {
        let request = self
            .authorized(self.api.get(&format!("/orders/v0/orders/{}", external_id)))
            .await?;
        let response: OrderResponse = self.api.json(request).await?;
        self.with_items(response.payload).await
    }

    fn map_status(&self, native: &str) -> Option<OrderStatus> {
        map_order_status(native)
    }

    fn inventory(&self) -> Option<&dyn InventorySync> {
        // The Listings API addresses items by seller id
        self.seller_id.as_ref().map(|_| self as &dyn InventorySync)
    }
}

#[async_trait]
impl InventorySync for AmazonProvider {
    async fn update_stock(&self, sku: &str, quantity: u32) -> ProviderResult<()> {
        self.patch_listing(
            sku,
            json!([{
                "op": "replace",
                "path": "/attributes/fulfillment_availability",
                "value": [{"fulfillment_channel_code": "DEFAULT", "quantity": quantity}]
            }]),
        )
        .await
    }

    async fn update_price(&self, sku: &str, price: Decimal, currency: &str) -> ProviderResult<()> {
        self.patch_listing(
            sku,
            json!([{
                "op": "replace",
                "path": "/attributes/purchasable_offer",
                "value": [{
                    "marketplace_id": self.marketplace_id,
                    "currency": currency,
                    "our_price": [{"schedule": [{"value_with_tax": price.to_string()}]}]
                }]
            }]),
        )
        .await
    }
}

impl AmazonProvider {
    async fn patch_listing(&self, sku: &str, patches: JsonValue) -> ProviderResult<()> {
        let seller_id = self
            .seller_id
            .as_deref()
            .ok_or_else(|| ProviderError::not_supported(NAME, "listings without seller_id"))?;
        let path = format!("/listings/2021-08-01/items/{}/{}", seller_id, sku);
        let request = self
            .authorized(
                self.api
                    .patch(&path)
                    .query(&[("marketplaceIds", self.marketplace_id.as_str())])
                    .json(&json!({"productType": "PRODUCT", "patches": patches})),
            )
            .await?;
        self.api.send(request).await
    }
}

#[derive(Debug, Deserialize)]
struct OrdersResponse {
    payload: OrdersPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrdersPayload {
    #[serde(default)]
    orders: Vec<JsonValue>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    payload: JsonValue,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    payload: ItemsPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsPayload {
    #[serde(default)]
    order_items: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AmazonOrder {
    amazon_order_id: String,
    order_status: String,
    purchase_date: String,
    order_total: Option<Money>,
    payment_method: Option<String>,
    shipping_address: Option<AmazonAddress>,
    buyer_info: Option<BuyerInfo>,
    #[serde(default)]
    order_items: Vec<AmazonItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Money {
    currency_code: String,
    amount: JsonValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AmazonAddress {
    #[serde(default)]
    name: String,
    #[serde(default)]
    address_line1: String,
    address_line2: Option<String>,
    #[serde(default)]
    city: String,
    #[serde(default)]
    postal_code: String,
    #[serde(default)]
    country_code: String,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BuyerInfo {
    buyer_email: Option<String>,
    buyer_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AmazonItem {
    order_item_id: String,
    #[serde(rename = "SellerSKU")]
    seller_sku: Option<String>,
    #[serde(default)]
    title: String,
    quantity_ordered: u32,
    item_price: Option<Money>,
}

fn normalize_order(raw: JsonValue) -> ProviderResult<NormalizedOrder> {
    let order: AmazonOrder = serde_json::from_value(raw.clone())?;

    // Pending orders carry no prices yet, so only a present but malformed amount is an error
    let line_items = order
        .order_items
        .iter()
        .map(|item| {
            // ItemPrice covers the whole quantity
            let line_total = item
                .item_price
                .as_ref()
                .map(|m| required_amount(&m.amount, "ItemPrice.Amount"))
                .transpose()?;
            let unit_price = match line_total {
                Some(total) if item.quantity_ordered > 0 => total / Decimal::from(item.quantity_ordered),
                Some(total) => total,
                None => Decimal::ZERO,
            };
            Ok(LineItem {
                external_id: item.order_item_id.clone(),
                sku: item.seller_sku.clone(),
                name: item.title.clone(),
                quantity: item.quantity_ordered,
                unit_price,
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;

    let (total_amount, currency) = match &order.order_total {
        Some(total) => (
            required_amount(&total.amount, "OrderTotal.Amount")?,
            total.currency_code.clone(),
        ),
        None => (Decimal::ZERO, String::new()),
    };

    let address = order.shipping_address.unwrap_or_default();
    let street = match &address.address_line2 {
        Some(line2) if !line2.is_empty() => format!("{} {}", address.address_line1, line2),
        _ => address.address_line1.clone(),
    };

    let buyer_name = order.buyer_info.as_ref().and_then(|b| b.buyer_name.clone());
    let payment_status = match order.order_status.as_str() {
        "Pending" | "PendingAvailability" | "Canceled" => PaymentStatus::Pending,
        _ => PaymentStatus::Paid,
    };

    Ok(NormalizedOrder {
        external_id: order.amazon_order_id,
        external_status: order.order_status,
        customer: Customer {
            name: buyer_name.unwrap_or_else(|| address.name.clone()),
            email: order.buyer_info.and_then(|b| b.buyer_email),
            phone: address.phone.clone(),
        },
        shipping_address: Address {
            name: address.name,
            company: None,
            street,
            city: address.city,
            postal_code: address.postal_code,
            country_code: address.country_code,
            phone: address.phone,
        },
        billing_address: None,
        line_items,
        total_amount,
        currency,
        payment_status,
        payment_method: order.payment_method,
        ordered_at: parse_timestamp(&order.purchase_date).unwrap_or_else(Utc::now),
        provider_raw_data: raw_map(raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_fixture() -> JsonValue {
        json!({
            "AmazonOrderId": "403-1234567-1234567",
            "OrderStatus": "Unshipped",
            "PurchaseDate": "2024-06-01T10:00:00Z",
            "LastUpdateDate": "2024-06-01T10:05:00Z",
            "FulfillmentChannel": "MFN",
            "ShipmentServiceLevelCategory": "Standard",
            "OrderTotal": {"CurrencyCode": "PLN", "Amount": "59.98"},
            "PaymentMethod": "Other",
            "ShippingAddress": {
                "Name": "Piotr Zieliński",
                "AddressLine1": "Polna 3",
                "City": "Gdańsk",
                "PostalCode": "80-001",
                "CountryCode": "PL"
            },
            "BuyerInfo": {"BuyerEmail": "abc@marketplace.amazon.pl"},
            "OrderItems": [{
                "OrderItemId": "item-1",
                "SellerSKU": "SKU-9",
                "Title": "Lampka",
                "QuantityOrdered": 2,
                "ItemPrice": {"CurrencyCode": "PLN", "Amount": "59.98"}
            }]
        })
    }

    #[test]
    fn test_status_table() {
        for native in ["Pending", "Unshipped", "PartiallyShipped", "Shipped", "Canceled", "Unfulfillable"] {
            assert!(map_order_status(native).is_some());
        }
        assert_eq!(map_order_status("Canceled"), Some(OrderStatus::Cancelled));
        assert_eq!(map_order_status("Lost"), None);
    }

    #[test]
    fn test_normalize_order_divides_item_price() {
        let order = normalize_order(order_fixture()).unwrap();
        assert_eq!(order.external_id, "403-1234567-1234567");
        assert_eq!(order.customer.name, "Piotr Zieliński");
        assert_eq!(order.total_amount, Decimal::new(5998, 2));
        assert_eq!(order.line_items[0].unit_price, Decimal::new(2999, 2));
        assert_eq!(order.payment_status, PaymentStatus::Paid);

        let extras = map_order_extras(&order);
        assert_eq!(extras.fulfillment_channel.as_deref(), Some("MFN"));
        assert_eq!(extras.delivery_method.as_deref(), Some("Standard"));
    }

    #[test]
    fn test_inventory_requires_seller_id() {
        let creds = json!({"client_id": "c", "client_secret": "s", "refresh_token": "r"});
        let provider = AmazonProvider::from_config(Client::new(), &creds, &json!({})).unwrap();
        assert!(provider.inventory().is_none());
        assert!(provider.offers().is_none());

        let mut with_seller = creds.clone();
        with_seller["seller_id"] = json!("A2SELLER");
        let provider = AmazonProvider::from_config(Client::new(), &with_seller, &json!({})).unwrap();
        assert!(provider.inventory().is_some());
    }
}
