//! Allegro REST API adapter.
//!
//! Incremental sync follows the order event journal: the cursor is the id of
//! the last event seen, and each event points at a checkout form that is
//! fetched and normalized.

use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{
    join_name, lookup_status, parse_amount, parse_timestamp, pointer_str, raw_map, OrderBatch,
};
use crate::oauth::{refresh_access_token, ClientAuth, OAuthClientConfig};
use async_trait::async_trait;
use chrono::Utc;
use marketsync_core::{
    Address, Customer, LineItem, NormalizedOrder, Offer, OrderExtras, OrderStatus, PaymentStatus,
};
use marketsync_registry::{
    InventorySync, MarketplaceProvider, MarketplaceRegistration, OfferSync, PollResult,
    ProviderError, ProviderResult, RefreshedTokens, TokenRefresher,
};
use reqwest::{header::ACCEPT, header::CONTENT_TYPE, Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;
use std::time::Duration;

pub const NAME: &str = "allegro";

const PRODUCTION_API: &str = "https://api.allegro.pl";
const SANDBOX_API: &str = "https://api.allegro.pl.allegrosandbox.pl";
const PRODUCTION_TOKEN_URL: &str = "https://allegro.pl/auth/oauth/token";
const SANDBOX_TOKEN_URL: &str = "https://allegro.pl.allegrosandbox.pl/auth/oauth/token";
const MEDIA_TYPE: &str = "application/vnd.allegro.public.v1+json";
const DEFAULT_PAGE_SIZE: u32 = 100;

const STATUS_TABLE: &[(&str, OrderStatus)] = &[
    // checkout form statuses
    ("BOUGHT", OrderStatus::Pending),
    ("FILLED_IN", OrderStatus::Pending),
    ("READY_FOR_PROCESSING", OrderStatus::Confirmed),
    ("CANCELLED", OrderStatus::Cancelled),
    // fulfillment statuses
    ("NEW", OrderStatus::Confirmed),
    ("PROCESSING", OrderStatus::Confirmed),
    ("READY_FOR_SHIPMENT", OrderStatus::Confirmed),
    ("READY_FOR_PICKUP", OrderStatus::Shipped),
    ("SENT", OrderStatus::Shipped),
    ("PICKED_UP", OrderStatus::Delivered),
    ("SUSPENDED", OrderStatus::Pending),
    ("RETURNED", OrderStatus::Returned),
];

pub fn map_order_status(native: &str) -> Option<OrderStatus> {
    lookup_status(STATUS_TABLE, native)
}

/// Delivery details live in the checkout form's nested objects
pub fn map_order_extras(order: &NormalizedOrder) -> OrderExtras {
    let raw = JsonValue::Object(order.provider_raw_data.clone());
    OrderExtras {
        delivery_method: pointer_str(&raw, "/delivery/method/name"),
        pickup_point_id: pointer_str(&raw, "/delivery/pickupPoint/id"),
        fulfillment_channel: None,
        customer_note: pointer_str(&raw, "/messageToSeller"),
    }
}

pub fn registration(http: Client) -> MarketplaceRegistration {
    MarketplaceRegistration::new(NAME, move |credentials, settings| {
        let provider = AllegroProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn MarketplaceProvider>)
    })
    .with_order_mapper(map_order_extras)
    .refreshable()
}

#[derive(Deserialize)]
struct AllegroCredentials {
    client_id: String,
    client_secret: String,
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    sandbox: bool,
}

pub struct AllegroProvider {
    api: ApiClient,
    credentials: AllegroCredentials,
    oauth: OAuthClientConfig,
    page_size: u32,
    page_delay: Option<Duration>,
}

impl AllegroProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: AllegroCredentials = parse_credentials(
            credentials,
            &["client_id", "client_secret", "access_token", "refresh_token"],
        )?;
        let mut settings = ProviderSettings::from_value(settings)?;
        settings.sandbox |= credentials.sandbox;

        let oauth = OAuthClientConfig::new(
            http.clone(),
            credentials.client_id.clone(),
            credentials.client_secret.clone(),
            settings.token_endpoint(PRODUCTION_TOKEN_URL, SANDBOX_TOKEN_URL),
            ClientAuth::BasicHeader,
        );

        Ok(Self {
            api: ApiClient::new(http, settings.base_url(PRODUCTION_API, SANDBOX_API), NAME),
            page_size: settings.page_size_or(DEFAULT_PAGE_SIZE),
            page_delay: settings.page_delay_ms.map(Duration::from_millis),
            credentials,
            oauth,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.credentials.access_token).header(ACCEPT, MEDIA_TYPE)
    }

    async fn fetch_events(&self, from: &str) -> ProviderResult<Vec<OrderEvent>> {
        let mut query = vec![
            ("type", "READY_FOR_PROCESSING".to_string()),
            ("limit", self.page_size.to_string()),
        ];
        if !from.is_empty() {
            query.push(("from", from.to_string()));
        }
        let page: EventsPage = self
            .api
            .json(self.authorized(self.api.get("/order/events")).query(&query))
            .await?;
        Ok(page.events)
    }

    async fn fetch_checkout_form(&self, form_id: &str) -> ProviderResult<NormalizedOrder> {
        let raw: JsonValue = self
            .api
            .json(self.authorized(self.api.get(&format!("/order/checkout-forms/{}", form_id))))
            .await?;
        normalize_checkout_form(raw)
    }
}

#[async_trait]
impl MarketplaceProvider for AllegroProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn poll_orders(&self, cursor: &str) -> ProviderResult<PollResult> {
        let mut from = cursor.to_string();
        let mut last_event_id: Option<String> = None;
        let mut seen = HashSet::new();
        let mut orders = OrderBatch::new();

        loop {
            let events = self.fetch_events(&from).await?;
            let page_len = events.len();

            for event in events {
                let form_id = event.order.checkout_form.id;
                // Several events can point at the same checkout form
                if seen.insert(form_id.clone()) {
                    match self.fetch_checkout_form(&form_id).await {
                        Err(err) if !matches!(err, ProviderError::Decode(_)) => return Err(err),
                        result => orders.push(Some(form_id), result),
                    }
                }
                last_event_id = Some(event.id);
            }

            match &last_event_id {
                Some(id) if page_len as u32 >= self.page_size => from = id.clone(),
                _ => break,
            }
            if let Some(delay) = self.page_delay {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(orders.finish(last_event_id))
    }

    async fn get_order(&self, external_id: &str) -> ProviderResult<NormalizedOrder> {
        self.fetch_checkout_form(external_id).await
    }

    fn map_status(&self, native: &str) -> Option<OrderStatus> {
        map_order_status(native)
    }

    fn offers(&self) -> Option<&dyn OfferSync> {
        Some(self)
    }

    fn inventory(&self) -> Option<&dyn InventorySync> {
        Some(self)
    }

    fn token_refresher(&self) -> Option<&dyn TokenRefresher> {
        Some(self)
    }
}

#[async_trait]
impl OfferSync for AllegroProvider {
    async fn push_offer(&self, offer: &Offer) -> ProviderResult<String> {
        let mut body = json!({
            "name": offer.name,
            "external": {"id": offer.sku},
            "sellingMode": {"price": {"amount": offer.price.to_string(), "currency": offer.currency}},
            "stock": {"available": offer.quantity},
        });
        if let Some(category_id) = &offer.category_id {
            body["category"] = json!({"id": category_id});
        }
        if let Some(ean) = &offer.ean {
            body["productSet"] = json!([{"product": {"id": ean, "idType": "GTIN"}}]);
        }
        if let Some(description) = &offer.description {
            body["description"] =
                json!({"sections": [{"items": [{"type": "TEXT", "content": description}]}]});
        }

        let created: CreatedOffer = self
            .api
            .json(
                self.authorized(self.api.post("/sale/product-offers"))
                    .header(CONTENT_TYPE, MEDIA_TYPE)
                    .json(&body),
            )
            .await?;
        Ok(created.id)
    }
}

#[async_trait]
impl InventorySync for AllegroProvider {
    async fn update_stock(&self, offer_id: &str, quantity: u32) -> ProviderResult<()> {
        self.api
            .send(
                self.authorized(self.api.patch(&format!("/sale/product-offers/{}", offer_id)))
                    .header(CONTENT_TYPE, MEDIA_TYPE)
                    .json(&json!({"stock": {"available": quantity}})),
            )
            .await
    }

    async fn update_price(
        &self,
        offer_id: &str,
        price: Decimal,
        currency: &str,
    ) -> ProviderResult<()> {
        self.api
            .send(
                self.authorized(self.api.patch(&format!("/sale/product-offers/{}", offer_id)))
                    .header(CONTENT_TYPE, MEDIA_TYPE)
                    .json(&json!({
                        "sellingMode": {"price": {"amount": price.to_string(), "currency": currency}}
                    })),
            )
            .await
    }
}

#[async_trait]
impl TokenRefresher for AllegroProvider {
    async fn refresh_tokens(&self) -> ProviderResult<RefreshedTokens> {
        refresh_access_token(&self.oauth, &self.credentials.refresh_token).await
    }
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    events: Vec<OrderEvent>,
}

#[derive(Debug, Deserialize)]
struct OrderEvent {
    id: String,
    order: EventOrder,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventOrder {
    checkout_form: IdRef,
}

#[derive(Debug, Default, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreatedOffer {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutForm {
    id: String,
    status: String,
    #[serde(default)]
    buyer: Buyer,
    payment: Option<Payment>,
    fulfillment: Option<Fulfillment>,
    delivery: Option<Delivery>,
    invoice: Option<Invoice>,
    #[serde(default)]
    line_items: Vec<FormLineItem>,
    summary: Option<Summary>,
    updated_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Buyer {
    email: Option<String>,
    login: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payment {
    #[serde(rename = "type")]
    payment_type: Option<String>,
    finished_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Fulfillment {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delivery {
    address: Option<FormAddress>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormAddress {
    first_name: Option<String>,
    last_name: Option<String>,
    company_name: Option<String>,
    #[serde(default)]
    street: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    zip_code: String,
    #[serde(default)]
    country_code: String,
    phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Invoice {
    #[serde(default)]
    required: bool,
    address: Option<InvoiceAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceAddress {
    #[serde(default)]
    street: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    zip_code: String,
    #[serde(default)]
    country_code: String,
    company: Option<NamedRef>,
    natural_person: Option<NaturalPerson>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NaturalPerson {
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormLineItem {
    id: String,
    offer: LineOffer,
    quantity: u32,
    price: Money,
    bought_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LineOffer {
    #[serde(default)]
    name: String,
    external: Option<IdRef>,
}

#[derive(Debug, Deserialize)]
struct Money {
    amount: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    total_to_pay: Money,
}

fn normalize_checkout_form(raw: JsonValue) -> ProviderResult<NormalizedOrder> {
    let form: CheckoutForm = serde_json::from_value(raw.clone())?;

    let line_items = form
        .line_items
        .iter()
        .map(|item| {
            Ok(LineItem {
                external_id: item.id.clone(),
                sku: item.offer.external.as_ref().map(|e| e.id.clone()),
                name: item.offer.name.clone(),
                quantity: item.quantity,
                unit_price: parse_amount(&item.price.amount)?,
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;

    let (total_amount, currency) = match &form.summary {
        Some(summary) => (
            parse_amount(&summary.total_to_pay.amount)?,
            summary.total_to_pay.currency.clone(),
        ),
        None => (
            line_items.iter().map(|i| i.unit_price * Decimal::from(i.quantity)).sum(),
            form.line_items.first().map(|i| i.price.currency.clone()).unwrap_or_default(),
        ),
    };

    let address = form.delivery.as_ref().and_then(|d| d.address.as_ref());
    let shipping_address = address.map(to_address).unwrap_or_default();

    let customer_name =
        match join_name(form.buyer.first_name.as_deref(), form.buyer.last_name.as_deref()) {
            name if name.is_empty() => form.buyer.login.clone().unwrap_or_default(),
            name => name,
        };

    let billing_address = form
        .invoice
        .as_ref()
        .filter(|invoice| invoice.required)
        .and_then(|invoice| invoice.address.as_ref())
        .map(|a| Address {
            name: a
                .company
                .as_ref()
                .and_then(|c| c.name.clone())
                .or_else(|| {
                    a.natural_person
                        .as_ref()
                        .map(|p| join_name(p.first_name.as_deref(), p.last_name.as_deref()))
                })
                .unwrap_or_default(),
            company: a.company.as_ref().and_then(|c| c.name.clone()),
            street: a.street.clone(),
            city: a.city.clone(),
            postal_code: a.zip_code.clone(),
            country_code: a.country_code.clone(),
            phone: None,
        });

    let paid = form.payment.as_ref().and_then(|p| p.finished_at.as_ref()).is_some();
    let ordered_at = form
        .line_items
        .iter()
        .filter_map(|i| i.bought_at.as_deref().and_then(parse_timestamp))
        .min()
        .or_else(|| form.updated_at.as_deref().and_then(parse_timestamp))
        .unwrap_or_else(Utc::now);

    let external_status = form
        .fulfillment
        .as_ref()
        .and_then(|f| f.status.clone())
        .filter(|_| form.status == "READY_FOR_PROCESSING")
        .unwrap_or_else(|| form.status.clone());

    Ok(NormalizedOrder {
        external_id: form.id.clone(),
        external_status,
        customer: Customer {
            name: customer_name,
            email: form.buyer.email.clone(),
            phone: form.buyer.phone_number.clone(),
        },
        shipping_address,
        billing_address,
        line_items,
        total_amount,
        currency,
        payment_status: if paid { PaymentStatus::Paid } else { PaymentStatus::Pending },
        payment_method: form.payment.as_ref().and_then(|p| p.payment_type.clone()),
        ordered_at,
        provider_raw_data: raw_map(raw),
    })
}

fn to_address(address: &FormAddress) -> Address {
    Address {
        name: join_name(address.first_name.as_deref(), address.last_name.as_deref()),
        company: address.company_name.clone(),
        street: address.street.clone(),
        city: address.city.clone(),
        postal_code: address.zip_code.clone(),
        country_code: address.country_code.clone(),
        phone: address.phone_number.clone(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use marketsync_registry::ProviderError;

    pub(crate) fn checkout_form(id: &str) -> JsonValue {
        json!({
            "id": id,
            "status": "READY_FOR_PROCESSING",
            "buyer": {
                "email": "buyer@example.com",
                "login": "buyer123",
                "firstName": "Anna",
                "lastName": "Nowak",
                "phoneNumber": "+48500100200"
            },
            "payment": {"type": "ONLINE", "finishedAt": "2024-05-01T09:00:00Z"},
            "fulfillment": {"status": "NEW"},
            "delivery": {
                "address": {
                    "firstName": "Anna",
                    "lastName": "Nowak",
                    "street": "Długa 5",
                    "city": "Kraków",
                    "zipCode": "30-001",
                    "countryCode": "PL",
                    "phoneNumber": "+48500100200"
                },
                "method": {"id": "m1", "name": "Allegro Paczkomaty InPost"},
                "pickupPoint": {"id": "KRA01M"}
            },
            "lineItems": [{
                "id": "li-1",
                "offer": {"id": "o-1", "name": "Kubek", "external": {"id": "SKU-1"}},
                "quantity": 2,
                "price": {"amount": "24.50", "currency": "PLN"},
                "boughtAt": "2024-05-01T08:59:00Z"
            }],
            "summary": {"totalToPay": {"amount": "49.00", "currency": "PLN"}},
            "messageToSeller": "Proszę o fakturę",
            "updatedAt": "2024-05-01T09:01:00Z"
        })
    }

    #[test]
    fn test_status_table_is_total_over_fixtures() {
        let fixtures = [
            "BOUGHT",
            "FILLED_IN",
            "READY_FOR_PROCESSING",
            "CANCELLED",
            "NEW",
            "SENT",
            "PICKED_UP",
            "RETURNED",
        ];
        for native in fixtures {
            assert!(map_order_status(native).is_some(), "{native} should map");
        }
        assert_eq!(map_order_status("SENT"), Some(OrderStatus::Shipped));
        assert_eq!(map_order_status("ready_for_processing"), Some(OrderStatus::Confirmed));
        assert_eq!(map_order_status("TELEPORTED"), None);
    }

    #[test]
    fn test_normalize_checkout_form() {
        let order = normalize_checkout_form(checkout_form("cf-1")).unwrap();
        assert_eq!(order.external_id, "cf-1");
        assert_eq!(order.external_status, "NEW");
        assert_eq!(order.customer.name, "Anna Nowak");
        assert_eq!(order.shipping_address.postal_code, "30-001");
        assert_eq!(order.total_amount, Decimal::new(4900, 2));
        assert_eq!(order.line_items[0].sku.as_deref(), Some("SKU-1"));
        assert_eq!(order.line_items[0].unit_price, Decimal::new(2450, 2));
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert!(order.billing_address.is_none());
    }

    #[test]
    fn test_order_extras_from_checkout_form() {
        let order = normalize_checkout_form(checkout_form("cf-1")).unwrap();
        let extras = map_order_extras(&order);
        assert_eq!(extras.delivery_method.as_deref(), Some("Allegro Paczkomaty InPost"));
        assert_eq!(extras.pickup_point_id.as_deref(), Some("KRA01M"));
        assert_eq!(extras.customer_note.as_deref(), Some("Proszę o fakturę"));
    }

    #[test]
    fn test_missing_credentials_fail_before_io() {
        let err = AllegroProvider::from_config(
            Client::new(),
            &json!({"client_id": "id", "client_secret": "s", "access_token": "a"}),
            &json!({}),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ProviderError::MissingCredential(f) if f == "refresh_token"));
    }
}
