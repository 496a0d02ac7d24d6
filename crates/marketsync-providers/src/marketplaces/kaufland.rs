//! Kaufland Seller API (v2) adapter.
//!
//! Every request carries an HMAC-SHA256 signature over
//! `METHOD\nURI\nBODY\nTIMESTAMP` keyed with the client secret. The API lists
//! order units; units sharing an `id_order` are folded into one order.

use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{
    advance_timestamp_cursor, from_minor_units, join_name, lookup_status, parse_timestamp,
    pointer_str, raw_map, OrderBatch,
};
use crate::signing::sign_hex;
use async_trait::async_trait;
use chrono::Utc;
use marketsync_core::{Address, Customer, LineItem, NormalizedOrder, OrderStatus, PaymentStatus};
use marketsync_registry::{
    InventorySync, MarketplaceProvider, MarketplaceRegistration, PollResult, ProviderError,
    ProviderResult,
};
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use std::time::Duration;
use url::Url;

pub const NAME: &str = "kaufland";

const PRODUCTION_API: &str = "https://sellerapi.kaufland.com/v2";
const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_STOREFRONT: &str = "de";
const USER_AGENT: &str = "marketsync";

const STATUS_TABLE: &[(&str, OrderStatus)] = &[
    ("open", OrderStatus::Pending),
    ("need_to_be_sent", OrderStatus::Confirmed),
    ("sent", OrderStatus::Shipped),
    ("sent_and_autopaid", OrderStatus::Shipped),
    ("received", OrderStatus::Delivered),
    ("cancelled", OrderStatus::Cancelled),
    ("return_requested", OrderStatus::Returned),
    ("return_accepted", OrderStatus::Returned),
    ("returned", OrderStatus::Returned),
];

pub fn map_order_status(native: &str) -> Option<OrderStatus> {
    lookup_status(STATUS_TABLE, native)
}

pub fn registration(http: Client) -> MarketplaceRegistration {
    MarketplaceRegistration::new(NAME, move |credentials, settings| {
        let provider = KauflandProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn MarketplaceProvider>)
    })
}

/// Hex signature for one request
pub fn request_signature(
    secret_key: &str,
    method: &Method,
    uri: &str,
    body: &str,
    timestamp: i64,
) -> String {
    let payload = format!("{}\n{}\n{}\n{}", method.as_str(), uri, body, timestamp);
    sign_hex(secret_key.as_bytes(), payload.as_bytes())
}

#[derive(Deserialize)]
struct KauflandCredentials {
    client_key: String,
    secret_key: String,
}

pub struct KauflandProvider {
    api: ApiClient,
    credentials: KauflandCredentials,
    storefront: String,
    page_size: u32,
    page_delay: Option<Duration>,
}

impl KauflandProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: KauflandCredentials =
            parse_credentials(credentials, &["client_key", "secret_key"])?;
        let settings = ProviderSettings::from_value(settings)?;

        Ok(Self {
            api: ApiClient::new(http, settings.base_url(PRODUCTION_API, PRODUCTION_API), NAME),
            storefront: settings
                .extra_str("storefront")
                .unwrap_or(DEFAULT_STOREFRONT)
                .to_string(),
            page_size: settings.page_size_or(DEFAULT_PAGE_SIZE),
            page_delay: settings.page_delay_ms.map(Duration::from_millis),
            credentials,
        })
    }

    fn signed(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&JsonValue>,
    ) -> ProviderResult<RequestBuilder> {
        let mut url = Url::parse(&self.api.url(path))
            .map_err(|e| ProviderError::InvalidSettings(format!("Invalid request URL: {}", e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        let body = body.map(JsonValue::to_string).unwrap_or_default();
        let timestamp = Utc::now().timestamp();
        let signature =
            request_signature(&self.credentials.secret_key, &method, url.as_str(), &body, timestamp);

        let request = self
            .api
            .http()
            .request(method, url)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .header("Shop-Client-Key", &self.credentials.client_key)
            .header("Shop-Timestamp", timestamp.to_string())
            .header("Shop-Signature", signature);

        Ok(if body.is_empty() {
            request
        } else {
            request.header("Content-Type", "application/json").body(body)
        })
    }
}

#[async_trait]
impl MarketplaceProvider for KauflandProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn poll_orders(&self, cursor: &str) -> ProviderResult<PollResult> {
        let mut offset = 0u32;
        let mut units = Vec::new();

        loop {
            let mut query = vec![
                ("storefront", self.storefront.clone()),
                ("limit", self.page_size.to_string()),
                ("offset", offset.to_string()),
            ];
            if !cursor.is_empty() {
                query.push(("ts_updated_from_iso", cursor.to_string()));
            }

            let page: UnitsPage = self
                .api
                .json(self.signed(Method::GET, "/order-units", &query, None)?)
                .await?;
            let page_len = page.data.len() as u32;
            units.extend(page.data);

            offset += page_len;
            let total = page.pagination.map(|p| p.total).unwrap_or(0);
            if page_len < self.page_size || offset >= total {
                break;
            }
            if let Some(delay) = self.page_delay {
                tokio::time::sleep(delay).await;
            }
        }

        let latest = units
            .iter()
            .filter_map(|unit| pointer_str(unit, "/ts_updated_iso"))
            .filter_map(|ts| parse_timestamp(&ts))
            .max();
        let mut orders = OrderBatch::new();
        for (id, units) in group_units(units) {
            let result = normalize_order(&id, units);
            orders.push(Some(id), result);
        }

        Ok(orders.finish(advance_timestamp_cursor(cursor, latest)))
    }

    async fn get_order(&self, external_id: &str) -> ProviderResult<NormalizedOrder> {
        let response: JsonValue = self
            .api
            .json(self.signed(Method::GET, &format!("/orders/{}", external_id), &[], None)?)
            .await?;
        let units = response
            .pointer("/data/order_units")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        if units.is_empty() {
            return Err(ProviderError::Api {
                status: 404,
                message: format!("order {} has no units", external_id),
            });
        }
        normalize_order(external_id, units)
    }

    fn map_status(&self, native: &str) -> Option<OrderStatus> {
        map_order_status(native)
    }

    fn inventory(&self) -> Option<&dyn InventorySync> {
        Some(self)
    }
}

#[async_trait]
impl InventorySync for KauflandProvider {
    async fn update_stock(&self, offer_id: &str, quantity: u32) -> ProviderResult<()> {
        let body = json!({"amount": quantity});
        let path = format!("/units/{}", offer_id);
        self.api
            .send(self.signed(Method::PATCH, &path, &[], Some(&body))?)
            .await
    }

    async fn update_price(
        &self,
        offer_id: &str,
        price: Decimal,
        _currency: &str,
    ) -> ProviderResult<()> {
        let body = json!({"listing_price": crate::normalize::to_minor_units(price)});
        let path = format!("/units/{}", offer_id);
        self.api
            .send(self.signed(Method::PATCH, &path, &[], Some(&body))?)
            .await
    }
}

#[derive(Debug, Deserialize)]
struct UnitsPage {
    #[serde(default)]
    data: Vec<JsonValue>,
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    total: u32,
}

/// Units grouped by `id_order`, in order of first appearance
fn group_units(units: Vec<JsonValue>) -> Vec<(String, Vec<JsonValue>)> {
    let mut groups: Vec<(String, Vec<JsonValue>)> = Vec::new();
    for unit in units {
        let Some(order_id) = pointer_str(&unit, "/id_order") else {
            continue;
        };
        match groups.iter_mut().find(|(id, _)| *id == order_id) {
            Some((_, members)) => members.push(unit),
            None => groups.push((order_id, vec![unit])),
        }
    }
    groups
}

fn kaufland_address(value: &JsonValue, pointer: &str) -> Option<Address> {
    let address = value.pointer(pointer)?;
    let street = join_name(
        address.get("street").and_then(|v| v.as_str()),
        address.get("house_number").and_then(|v| v.as_str()),
    );
    Some(Address {
        name: join_name(
            address.get("first_name").and_then(|v| v.as_str()),
            address.get("last_name").and_then(|v| v.as_str()),
        ),
        company: pointer_str(address, "/company_name"),
        street,
        city: pointer_str(address, "/city").unwrap_or_default(),
        postal_code: pointer_str(address, "/postcode").unwrap_or_default(),
        country_code: pointer_str(address, "/country").unwrap_or_default(),
        phone: pointer_str(address, "/phone"),
    })
}

/// Order status is the least advanced unit status
fn aggregate_status(units: &[JsonValue]) -> String {
    let statuses: Vec<String> = units.iter().filter_map(|u| pointer_str(u, "/status")).collect();
    if statuses.iter().all(|s| s == "cancelled") {
        return "cancelled".to_string();
    }
    STATUS_TABLE
        .iter()
        .map(|(name, _)| *name)
        .find(|name| statuses.iter().any(|s| s == name && s != "cancelled"))
        .map(str::to_string)
        .or_else(|| statuses.first().cloned())
        .unwrap_or_default()
}

fn normalize_order(order_id: &str, units: Vec<JsonValue>) -> ProviderResult<NormalizedOrder> {
    let first = units
        .first()
        .cloned()
        .ok_or_else(|| ProviderError::Decode(format!("order {} has no units", order_id)))?;

    let line_items = units
        .iter()
        .map(|unit| {
            let price = unit.get("price").and_then(|p| p.as_i64()).ok_or_else(|| {
                ProviderError::Decode(format!("order {} has a unit without a price", order_id))
            })?;
            Ok(LineItem {
                external_id: pointer_str(unit, "/id_order_unit").unwrap_or_default(),
                sku: pointer_str(unit, "/id_offer"),
                name: pointer_str(unit, "/product/title").unwrap_or_default(),
                quantity: 1,
                unit_price: from_minor_units(price),
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;
    let total_amount = line_items.iter().map(|item| item.unit_price).sum();

    let shipping_address = kaufland_address(&first, "/shipping_address").unwrap_or_default();
    let external_status = aggregate_status(&units);
    let payment_status = if external_status == "open" {
        PaymentStatus::Pending
    } else {
        PaymentStatus::Paid
    };

    let mut raw = Map::new();
    raw.insert("id_order".to_string(), json!(order_id));
    raw.insert("order_units".to_string(), JsonValue::Array(units.clone()));

    Ok(NormalizedOrder {
        external_id: order_id.to_string(),
        external_status,
        customer: Customer {
            name: shipping_address.name.clone(),
            email: pointer_str(&first, "/buyer/email"),
            phone: shipping_address.phone.clone(),
        },
        billing_address: kaufland_address(&first, "/billing_address"),
        shipping_address,
        line_items,
        total_amount,
        currency: pointer_str(&first, "/currency").unwrap_or_else(|| "EUR".to_string()),
        payment_status,
        payment_method: None,
        ordered_at: pointer_str(&first, "/ts_created_iso")
            .and_then(|ts| parse_timestamp(&ts))
            .unwrap_or_else(Utc::now),
        provider_raw_data: raw_map(JsonValue::Object(raw)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(order: &str, unit_id: u64, status: &str, price: i64) -> JsonValue {
        json!({
            "id_order": order,
            "id_order_unit": unit_id,
            "id_offer": "OFF-1",
            "status": status,
            "price": price,
            "ts_created_iso": "2024-06-01T10:00:00Z",
            "ts_updated_iso": "2024-06-01T12:00:00Z",
            "buyer": {"email": "buyer@example.de"},
            "product": {"title": "Gartenschlauch"},
            "shipping_address": {
                "first_name": "Max",
                "last_name": "Muster",
                "street": "Hauptstr.",
                "house_number": "5",
                "postcode": "10115",
                "city": "Berlin",
                "country": "DE"
            }
        })
    }

    #[test]
    fn test_units_fold_into_one_order() {
        let units = vec![
            unit("MQ1", 1, "need_to_be_sent", 1999),
            unit("MQ2", 2, "sent", 500),
            unit("MQ1", 3, "sent", 1001),
        ];
        let groups = group_units(units);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "MQ1");
        assert_eq!(groups[0].1.len(), 2);

        let (id, units) = groups.into_iter().next().unwrap();
        let order = normalize_order(&id, units).unwrap();
        assert_eq!(order.total_amount, Decimal::new(3000, 2));
        assert_eq!(order.external_status, "need_to_be_sent");
        assert_eq!(order.shipping_address.street, "Hauptstr. 5");
        assert_eq!(order.line_items.len(), 2);
        assert_eq!(order.currency, "EUR");
    }

    #[test]
    fn test_all_cancelled_units_cancel_the_order() {
        let units = vec![unit("MQ3", 1, "cancelled", 100), unit("MQ3", 2, "cancelled", 100)];
        assert_eq!(aggregate_status(&units), "cancelled");
        assert_eq!(map_order_status("cancelled"), Some(OrderStatus::Cancelled));
    }

    #[test]
    fn test_signature_covers_every_part() {
        let uri = "https://sellerapi.kaufland.com/v2/order-units?storefront=de";
        let base = request_signature("secret", &Method::GET, uri, "", 1_700_000_000);
        assert_eq!(
            base,
            sign_hex(
                b"secret",
                format!("GET\n{}\n\n1700000000", uri).as_bytes()
            )
        );
        assert_ne!(base, request_signature("secret", &Method::POST, uri, "", 1_700_000_000));
        assert_ne!(base, request_signature("secret", &Method::GET, uri, "{}", 1_700_000_000));
        assert_ne!(base, request_signature("secret", &Method::GET, uri, "", 1_700_000_001));
        assert_ne!(base, request_signature("other", &Method::GET, uri, "", 1_700_000_000));
    }

    #[test]
    fn test_unit_without_price_is_a_decode_error() {
        let mut broken = unit("MQ4", 2, "sent", 0);
        broken.as_object_mut().unwrap().remove("price");
        let err = normalize_order("MQ4", vec![unit("MQ4", 1, "sent", 100), broken]).unwrap_err();
        assert!(matches!(err, ProviderError::Decode(ref msg) if msg.contains("MQ4")));
    }

    #[test]
    fn test_status_table() {
        for (native, status) in STATUS_TABLE {
            assert_eq!(map_order_status(native), Some(*status));
        }
        assert_eq!(map_order_status("sent_and_autopaid"), Some(OrderStatus::Shipped));
        assert_eq!(map_order_status("return_requested"), Some(OrderStatus::Returned));
        assert_eq!(map_order_status("received"), Some(OrderStatus::Delivered));
        assert_eq!(map_order_status("manual_review"), None);
    }
}
