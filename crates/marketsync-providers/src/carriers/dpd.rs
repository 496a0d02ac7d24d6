//! DPD Polska REST adapter

use super::oldest_first;
use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{lookup_status, parse_timestamp, pointer_str};
use async_trait::async_trait;
use marketsync_core::{
    LabelFormat, ShipmentParty, ShipmentRequest, ShipmentResponse, ShipmentStatus, TrackingEvent,
};
use marketsync_registry::{CarrierProvider, CarrierRegistration, ProviderError, ProviderResult};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

pub const NAME: &str = "dpd";

const PRODUCTION_API: &str = "https://api.dpd.com.pl/public/v1";
const SANDBOX_API: &str = "https://api-test.dpd.com.pl/public/v1";

const STATUS_TABLE: &[(&str, ShipmentStatus)] = &[
    ("SHIPMENT_DATA_RECEIVED", ShipmentStatus::Created),
    ("LABEL_PRINTED", ShipmentStatus::LabelReady),
    ("PICKED_UP", ShipmentStatus::PickedUp),
    ("IN_TRANSIT", ShipmentStatus::InTransit),
    ("AT_DEPOT", ShipmentStatus::InTransit),
    ("OUT_FOR_DELIVERY", ShipmentStatus::OutForDelivery),
    ("AT_PICKUP_POINT", ShipmentStatus::OutForDelivery),
    ("DELIVERED", ShipmentStatus::Delivered),
    ("RETURNED_TO_SENDER", ShipmentStatus::Returned),
    ("UNDELIVERABLE", ShipmentStatus::Failed),
    ("CANCELLED", ShipmentStatus::Cancelled),
];

pub fn map_shipment_status(native: &str) -> Option<ShipmentStatus> {
    lookup_status(STATUS_TABLE, native)
}

pub fn registration(http: Client) -> CarrierRegistration {
    CarrierRegistration::new(NAME, move |credentials, settings| {
        let provider = DpdProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn CarrierProvider>)
    })
}

#[derive(Deserialize)]
struct DpdCredentials {
    login: String,
    password: String,
    /// Customer master number
    fid: String,
    #[serde(default)]
    sandbox: bool,
}

pub struct DpdProvider {
    api: ApiClient,
    credentials: DpdCredentials,
}

impl DpdProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: DpdCredentials =
            parse_credentials(credentials, &["login", "password", "fid"])?;
        let mut settings = ProviderSettings::from_value(settings)?;
        settings.sandbox |= credentials.sandbox;

        Ok(Self {
            api: ApiClient::new(http, settings.base_url(PRODUCTION_API, SANDBOX_API), NAME),
            credentials,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .basic_auth(&self.credentials.login, Some(&self.credentials.password))
            .header("x-dpd-fid", &self.credentials.fid)
    }
}

fn party_json(party: &ShipmentParty) -> JsonValue {
    json!({
        "name": party.address.name,
        "company": party.address.company,
        "address": party.address.street,
        "city": party.address.city,
        "postalCode": party.address.postal_code.replace('-', ""),
        "countryCode": party.address.country_code,
        "phone": party.address.phone,
        "email": party.email,
    })
}

#[async_trait]
impl CarrierProvider for DpdProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn create_shipment(&self, request: &ShipmentRequest) -> ProviderResult<ShipmentResponse> {
        let parcels: Vec<JsonValue> = request
            .parcels
            .iter()
            .map(|p| {
                json!({
                    "weight": p.weight_kg.to_string(),
                    "sizeX": p.length_cm,
                    "sizeY": p.width_cm,
                    "sizeZ": p.height_cm,
                    "reference": request.reference,
                })
            })
            .collect();
        let mut services = json!({});
        if let Some(cod) = request.cod_amount {
            services["cod"] = json!({"amount": cod.to_string(), "currency": request.currency});
        }
        if let Some(value) = request.insurance_amount {
            services["declaredValue"] =
                json!({"amount": value.to_string(), "currency": request.currency});
        }
        if let Some(point) = &request.pickup_point_id {
            services["dpdPickup"] = json!({"pudo": point});
        }

        let body = json!({
            "payerFID": self.credentials.fid,
            "sender": party_json(&request.sender),
            "receiver": party_json(&request.receiver),
            "parcels": parcels,
            "services": services,
            "ref1": request.reference,
        });

        let response: JsonValue = self
            .api
            .json(self.authorized(self.api.post("/shipments")).json(&body))
            .await?;
        let external_id = pointer_str(&response, "/shipments/0/shipmentId")
            .ok_or_else(|| ProviderError::Decode("DPD response without shipmentId".to_string()))?;

        Ok(ShipmentResponse {
            external_id,
            tracking_number: pointer_str(&response, "/shipments/0/parcels/0/waybill"),
            status: ShipmentStatus::Created,
        })
    }

    async fn get_label(&self, shipment_id: &str, format: LabelFormat) -> ProviderResult<Vec<u8>> {
        let format = match format {
            LabelFormat::Pdf => "PDF",
            LabelFormat::Zpl => "ZPL",
            LabelFormat::Epl => "EPL",
        };
        self.api
            .bytes(
                self.authorized(self.api.get(&format!("/shipments/{}/label", shipment_id)))
                    .query(&[("format", format)]),
            )
            .await
    }

    async fn get_tracking(&self, tracking_number: &str) -> ProviderResult<Vec<TrackingEvent>> {
        let response: TrackingResponse = self
            .api
            .json(self.authorized(self.api.get(&format!("/tracking/{}", tracking_number))))
            .await?;

        let events = response
            .parcel_events
            .into_iter()
            .filter_map(|event| {
                Some(TrackingEvent {
                    occurred_at: parse_timestamp(&event.event_date_time)?,
                    status: event.event_code,
                    description: event.description,
                    location: event.depot,
                })
            })
            .collect();
        Ok(oldest_first(events))
    }

    async fn cancel_shipment(&self, shipment_id: &str) -> ProviderResult<()> {
        self.api
            .send(self.authorized(self.api.delete(&format!("/shipments/{}", shipment_id))))
            .await
    }

    fn map_status(&self, native: &str) -> Option<ShipmentStatus> {
        map_shipment_status(native)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackingResponse {
    #[serde(default)]
    parcel_events: Vec<DpdEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DpdEvent {
    event_code: String,
    description: Option<String>,
    depot: Option<String>,
    event_date_time: String,
}
