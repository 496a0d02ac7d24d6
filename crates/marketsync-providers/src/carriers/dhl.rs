//! DHL adapter: Parcel DE Shipping API v2 for shipments and labels, the
//! unified Shipment Tracking API for events.

use super::oldest_first;
use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{lookup_status, parse_timestamp, pointer_str, split_street};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use marketsync_core::{
    LabelFormat, ShipmentParty, ShipmentRequest, ShipmentResponse, ShipmentStatus, TrackingEvent,
};
use marketsync_registry::{CarrierProvider, CarrierRegistration, ProviderError, ProviderResult};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

pub const NAME: &str = "dhl";

const PRODUCTION_API: &str = "https://api-eu.dhl.com";
const SANDBOX_API: &str = "https://api-sandbox.dhl.com";
const SHIPPING_PATH: &str = "/parcel/de/shipping/v2/orders";
const TRACKING_PATH: &str = "/track/shipments";
const DEFAULT_PRODUCT: &str = "V01PAK";
const DEFAULT_PROFILE: &str = "STANDARD_GRUPPENPROFIL";

const STATUS_TABLE: &[(&str, ShipmentStatus)] = &[
    ("pre-transit", ShipmentStatus::Created),
    ("transit", ShipmentStatus::InTransit),
    ("delivered", ShipmentStatus::Delivered),
    ("failure", ShipmentStatus::Failed),
    ("returned", ShipmentStatus::Returned),
];

pub fn map_shipment_status(native: &str) -> Option<ShipmentStatus> {
    lookup_status(STATUS_TABLE, native)
}

pub fn registration(http: Client) -> CarrierRegistration {
    CarrierRegistration::new(NAME, move |credentials, settings| {
        let provider = DhlProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn CarrierProvider>)
    })
}

#[derive(Deserialize)]
struct DhlCredentials {
    api_key: String,
    username: String,
    password: String,
    billing_number: String,
    #[serde(default)]
    sandbox: bool,
}

pub struct DhlProvider {
    api: ApiClient,
    credentials: DhlCredentials,
    profile: String,
}

impl DhlProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: DhlCredentials = parse_credentials(
            credentials,
            &["api_key", "username", "password", "billing_number"],
        )?;
        let mut settings = ProviderSettings::from_value(settings)?;
        settings.sandbox |= credentials.sandbox;

        Ok(Self {
            api: ApiClient::new(http, settings.base_url(PRODUCTION_API, SANDBOX_API), NAME),
            profile: settings.extra_str("profile").unwrap_or(DEFAULT_PROFILE).to_string(),
            credentials,
        })
    }

    fn shipping(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("dhl-api-key", &self.credentials.api_key)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
    }

    fn doc_format(&self, format: LabelFormat) -> ProviderResult<&'static str> {
        match format {
            LabelFormat::Pdf => Ok("PDF"),
            LabelFormat::Zpl => Ok("ZPL2"),
            LabelFormat::Epl => Err(ProviderError::not_supported(NAME, "get_label(epl)")),
        }
    }
}

fn party_json(party: &ShipmentParty) -> JsonValue {
    let (street, house) = split_street(&party.address.street);
    json!({
        "name1": party.address.name,
        "name2": party.address.company,
        "addressStreet": street,
        "addressHouse": house,
        "postalCode": party.address.postal_code,
        "city": party.address.city,
        "country": party.address.country_code,
        "email": party.email,
        "phone": party.address.phone,
    })
}

fn first_item(response: &JsonValue) -> ProviderResult<&JsonValue> {
    response
        .pointer("/items/0")
        .ok_or_else(|| ProviderError::Decode("DHL response without items".to_string()))
}

#[async_trait]
impl CarrierProvider for DhlProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn create_shipment(&self, request: &ShipmentRequest) -> ProviderResult<ShipmentResponse> {
        let weight: rust_decimal::Decimal = request.parcels.iter().map(|p| p.weight_kg).sum();
        let body = json!({
            "profile": self.profile,
            "shipments": [{
                "product": request.service.as_deref().unwrap_or(DEFAULT_PRODUCT),
                "billingNumber": self.credentials.billing_number,
                "refNo": request.reference,
                "shipper": party_json(&request.sender),
                "consignee": party_json(&request.receiver),
                "details": {"weight": {"uom": "kg", "value": weight.to_string()}}
            }]
        });

        let response: JsonValue = self
            .api
            .json(self.shipping(self.api.post(SHIPPING_PATH)).json(&body))
            .await?;
        let item = first_item(&response)?;
        let shipment_no = pointer_str(item, "/shipmentNo")
            .ok_or_else(|| ProviderError::Decode("DHL item without shipmentNo".to_string()))?;

        Ok(ShipmentResponse {
            external_id: shipment_no.clone(),
            tracking_number: Some(shipment_no),
            status: ShipmentStatus::LabelReady,
        })
    }

    async fn get_label(&self, shipment_id: &str, format: LabelFormat) -> ProviderResult<Vec<u8>> {
        let doc_format = self.doc_format(format)?;
        let response: JsonValue = self
            .api
            .json(
                self.shipping(self.api.get(SHIPPING_PATH))
                    .query(&[("shipment", shipment_id), ("docFormat", doc_format)]),
            )
            .await?;

        let item = first_item(&response)?;
        let encoded = pointer_str(item, "/label/b64")
            .ok_or_else(|| ProviderError::Decode("DHL item without label".to_string()))?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| ProviderError::Decode(format!("label is not base64: {}", e)))
    }

    async fn get_tracking(&self, tracking_number: &str) -> ProviderResult<Vec<TrackingEvent>> {
        let response: TrackingResponse = self
            .api
            .json(
                self.api
                    .get(TRACKING_PATH)
                    .header("DHL-API-Key", &self.credentials.api_key)
                    .query(&[("trackingNumber", tracking_number)]),
            )
            .await?;

        let events = response
            .shipments
            .into_iter()
            .next()
            .map(|shipment| shipment.events)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|event| {
                Some(TrackingEvent {
                    occurred_at: parse_timestamp(&event.timestamp)?,
                    status: event.status_code.unwrap_or_else(|| "unknown".to_string()),
                    description: event.description.or(event.status),
                    location: event
                        .location
                        .as_ref()
                        .and_then(|l| pointer_str(l, "/address/addressLocality")),
                })
            })
            .collect();
        Ok(oldest_first(events))
    }

    async fn cancel_shipment(&self, shipment_id: &str) -> ProviderResult<()> {
        self.api
            .send(
                self.shipping(self.api.delete(SHIPPING_PATH))
                    .query(&[("profile", self.profile.as_str()), ("shipment", shipment_id)]),
            )
            .await
    }

    fn map_status(&self, native: &str) -> Option<ShipmentStatus> {
        map_shipment_status(native)
    }
}

#[derive(Debug, Deserialize)]
struct TrackingResponse {
    #[serde(default)]
    shipments: Vec<TrackedShipment>,
}

#[derive(Debug, Deserialize)]
struct TrackedShipment {
    #[serde(default)]
    events: Vec<DhlEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhlEvent {
    timestamp: String,
    status_code: Option<String>,
    status: Option<String>,
    description: Option<String>,
    location: Option<JsonValue>,
}
