use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::integration::TenantIntegration;

/// Canonical order status vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Returned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Returned => "returned",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Invalid(format!("unknown order status '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub company: Option<String>,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2
    pub country_code: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub external_id: String,
    pub sku: Option<String>,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// An order as reported by a marketplace, before persistence.
///
/// Produced fresh by every poll; it is either inserted or discarded as a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedOrder {
    pub external_id: String,
    pub external_status: String,
    pub customer: Customer,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub line_items: Vec<LineItem>,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub ordered_at: DateTime<Utc>,
    pub provider_raw_data: Map<String, JsonValue>,
}

/// Provider-specific columns extracted from an order's raw data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderExtras {
    pub delivery_method: Option<String>,
    pub pickup_point_id: Option<String>,
    pub fulfillment_channel: Option<String>,
    pub customer_note: Option<String>,
}

const DELIVERY_METHOD_KEYS: &[&str] = &["delivery_method", "deliveryMethod", "shipping_method"];
const PICKUP_POINT_KEYS: &[&str] = &["pickup_point_id", "pickupPointId", "pickup_point"];
const FULFILLMENT_CHANNEL_KEYS: &[&str] = &["fulfillment_channel", "fulfillmentChannel"];
const CUSTOMER_NOTE_KEYS: &[&str] = &["customer_note", "note", "buyer_message"];

impl OrderExtras {
    /// Default mapping: look the well-known keys up in the raw data map
    pub fn from_raw_conventions(raw: &Map<String, JsonValue>) -> Self {
        Self {
            delivery_method: first_string(raw, DELIVERY_METHOD_KEYS),
            pickup_point_id: first_string(raw, PICKUP_POINT_KEYS),
            fulfillment_channel: first_string(raw, FULFILLMENT_CHANNEL_KEYS),
            customer_note: first_string(raw, CUSTOMER_NOTE_KEYS),
        }
    }
}

fn first_string(raw: &Map<String, JsonValue>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(*key) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Row to insert into `orders`, keyed by `(tenant_id, source_provider, external_id)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub integration_id: Uuid,
    pub source_provider: String,
    pub external_id: String,
    pub external_status: String,
    pub status: OrderStatus,
    pub customer: Customer,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub line_items: Vec<LineItem>,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub ordered_at: DateTime<Utc>,
    pub extras: OrderExtras,
    pub raw_data: JsonValue,
}

impl NewOrder {
    pub fn from_normalized(
        integration: &TenantIntegration,
        order: &NormalizedOrder,
        status: OrderStatus,
        extras: OrderExtras,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: integration.tenant_id,
            integration_id: integration.integration_id,
            source_provider: integration.provider_name.clone(),
            external_id: order.external_id.clone(),
            external_status: order.external_status.clone(),
            status,
            customer: order.customer.clone(),
            shipping_address: order.shipping_address.clone(),
            billing_address: order.billing_address.clone(),
            line_items: order.line_items.clone(),
            total_amount: order.total_amount,
            currency: order.currency.clone(),
            payment_status: order.payment_status,
            payment_method: order.payment_method.clone(),
            ordered_at: order.ordered_at,
            extras,
            raw_data: JsonValue::Object(order.provider_raw_data.clone()),
        }
    }
}

/// Result of the dedup-checked insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Offer published to a marketplace catalogue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub ean: Option<String>,
    pub price: Decimal,
    pub currency: String,
    pub quantity: u32,
    pub category_id: Option<String>,
}
