use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::order::Address;

/// Canonical shipment status vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Created,
    LabelReady,
    PickedUp,
    InTransit,
    OutForDelivery,
    Delivered,
    Returned,
    Failed,
    Cancelled,
}

impl ShipmentStatus {
    pub const ALL: [ShipmentStatus; 9] = [
        ShipmentStatus::Created,
        ShipmentStatus::LabelReady,
        ShipmentStatus::PickedUp,
        ShipmentStatus::InTransit,
        ShipmentStatus::OutForDelivery,
        ShipmentStatus::Delivered,
        ShipmentStatus::Returned,
        ShipmentStatus::Failed,
        ShipmentStatus::Cancelled,
    ];

    /// Statuses that are no longer polled
    pub const TERMINAL: [ShipmentStatus; 4] = [
        ShipmentStatus::Delivered,
        ShipmentStatus::Returned,
        ShipmentStatus::Failed,
        ShipmentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Created => "created",
            ShipmentStatus::LabelReady => "label_ready",
            ShipmentStatus::PickedUp => "picked_up",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::OutForDelivery => "out_for_delivery",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Returned => "returned",
            ShipmentStatus::Failed => "failed",
            ShipmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShipmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Invalid(format!("unknown shipment status '{}'", s)))
    }
}

/// Shipment row as seen by the tracking poller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackableShipment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub provider: String,
    pub tracking_number: String,
    pub status: ShipmentStatus,
    pub integration_id: Option<Uuid>,
    /// Vault blob of the owning integration; `None` for unlinked shipments
    pub integration_credentials: Option<String>,
    pub integration_settings: JsonValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipmentParty {
    pub address: Address,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parcel {
    pub weight_kg: Decimal,
    pub length_cm: u32,
    pub width_cm: u32,
    pub height_cm: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentRequest {
    pub reference: String,
    pub sender: ShipmentParty,
    pub receiver: ShipmentParty,
    pub parcels: Vec<Parcel>,
    /// Carrier service code (e.g. `inpost_locker_standard`, `EXPRESS`)
    pub service: Option<String>,
    pub pickup_point_id: Option<String>,
    pub cod_amount: Option<Decimal>,
    pub insurance_amount: Option<Decimal>,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentResponse {
    pub external_id: String,
    pub tracking_number: Option<String>,
    pub status: ShipmentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelFormat {
    Pdf,
    Zpl,
    Epl,
}

impl LabelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelFormat::Pdf => "pdf",
            LabelFormat::Zpl => "zpl",
            LabelFormat::Epl => "epl",
        }
    }
}

impl FromStr for LabelFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(LabelFormat::Pdf),
            "zpl" => Ok(LabelFormat::Zpl),
            "epl" => Ok(LabelFormat::Epl),
            other => Err(CoreError::Invalid(format!("unknown label format '{}'", other))),
        }
    }
}

/// Carrier event in the carrier's own vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub status: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PickupPointQuery {
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupPoint {
    pub id: String,
    pub name: String,
    pub address: Address,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub opening_hours: Option<String>,
}
