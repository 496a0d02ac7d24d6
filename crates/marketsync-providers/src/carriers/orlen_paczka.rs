//! ORLEN Paczka adapter: parcel shipments to ORLEN stations and partner points

use super::oldest_first;
use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{lookup_status, parse_timestamp, pointer_str};
use async_trait::async_trait;
use marketsync_core::{
    Address, LabelFormat, PickupPoint, PickupPointQuery, ShipmentRequest, ShipmentResponse,
    ShipmentStatus, TrackingEvent,
};
use marketsync_registry::{
    CarrierProvider, CarrierRegistration, PickupPointSearch, ProviderError, ProviderResult,
};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value as JsonValue};

pub const NAME: &str = "orlen_paczka";

const PRODUCTION_API: &str = "https://api.orlenpaczka.pl/v1";
const SANDBOX_API: &str = "https://api-test.orlenpaczka.pl/v1";
const DEFAULT_POINT_LIMIT: u32 = 20;

/// `NOT_PICKED_UP` has no canonical status: the parcel is about to be returned.
const STATUS_TABLE: &[(&str, ShipmentStatus)] = &[
    ("CREATED", ShipmentStatus::Created),
    ("CONFIRMED", ShipmentStatus::LabelReady),
    ("SENT", ShipmentStatus::PickedUp),
    ("IN_TRANSIT", ShipmentStatus::InTransit),
    ("AT_SORTING_CENTER", ShipmentStatus::InTransit),
    ("READY_TO_PICKUP", ShipmentStatus::OutForDelivery),
    ("DELIVERED", ShipmentStatus::Delivered),
    ("PICKED_UP", ShipmentStatus::Delivered),
    ("RETURNED", ShipmentStatus::Returned),
    ("CANCELLED", ShipmentStatus::Cancelled),
];

pub fn map_shipment_status(native: &str) -> Option<ShipmentStatus> {
    lookup_status(STATUS_TABLE, native)
}

pub fn registration(http: Client) -> CarrierRegistration {
    CarrierRegistration::new(NAME, move |credentials, settings| {
        let provider = OrlenPaczkaProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn CarrierProvider>)
    })
}

#[derive(serde::Deserialize)]
struct OrlenCredentials {
    partner_id: String,
    partner_key: String,
    #[serde(default)]
    sandbox: bool,
}

pub struct OrlenPaczkaProvider {
    api: ApiClient,
    credentials: OrlenCredentials,
}

impl OrlenPaczkaProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: OrlenCredentials =
            parse_credentials(credentials, &["partner_id", "partner_key"])?;
        let mut settings = ProviderSettings::from_value(settings)?;
        settings.sandbox |= credentials.sandbox;

        Ok(Self {
            api: ApiClient::new(http, settings.base_url(PRODUCTION_API, SANDBOX_API), NAME),
            credentials,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("PartnerID", &self.credentials.partner_id)
            .header("PartnerKey", &self.credentials.partner_key)
    }
}

#[async_trait]
impl CarrierProvider for OrlenPaczkaProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn create_shipment(&self, request: &ShipmentRequest) -> ProviderResult<ShipmentResponse> {
        let destination = request.pickup_point_id.as_deref().ok_or_else(|| {
            ProviderError::InvalidSettings("ORLEN Paczka shipments need a pickup point".to_string())
        })?;
        let receiver = &request.receiver;
        let body = json!({
            "reference": request.reference,
            "destinationCode": destination,
            "senderEmail": request.sender.email,
            "senderPhone": request.sender.address.phone,
            "receiverName": receiver.address.name,
            "receiverEmail": receiver.email,
            "receiverPhone": receiver.address.phone,
            "parcelSize": request.service.as_deref().unwrap_or("M"),
            "codAmount": request.cod_amount.map(|a| a.to_string()),
            "insuranceAmount": request.insurance_amount.map(|a| a.to_string()),
        });

        let response: JsonValue = self
            .api
            .json(self.authorized(self.api.post("/packs")).json(&body))
            .await?;
        let pack_code = pointer_str(&response, "/packCode")
            .ok_or_else(|| ProviderError::Decode("response without packCode".to_string()))?;

        Ok(ShipmentResponse {
            external_id: pack_code.clone(),
            tracking_number: Some(pack_code),
            status: ShipmentStatus::Created,
        })
    }

    async fn get_label(&self, shipment_id: &str, format: LabelFormat) -> ProviderResult<Vec<u8>> {
        let format = match format {
            LabelFormat::Pdf => "PDF",
            LabelFormat::Zpl => "ZPL",
            LabelFormat::Epl => return Err(ProviderError::not_supported(NAME, "get_label(epl)")),
        };
        self.api
            .bytes(
                self.authorized(self.api.get(&format!("/packs/{}/label", shipment_id)))
                    .query(&[("format", format)]),
            )
            .await
    }

    async fn get_tracking(&self, tracking_number: &str) -> ProviderResult<Vec<TrackingEvent>> {
        let response: JsonValue = self
            .api
            .json(self.authorized(self.api.get(&format!("/packs/{}/history", tracking_number))))
            .await?;

        let history = response
            .get("history")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let events = history
            .iter()
            .filter_map(|entry| {
                Some(TrackingEvent {
                    occurred_at: parse_timestamp(&pointer_str(entry, "/date")?)?,
                    status: pointer_str(entry, "/status")?,
                    description: pointer_str(entry, "/description"),
                    location: pointer_str(entry, "/pointName"),
                })
            })
            .collect();
        Ok(oldest_first(events))
    }

    async fn cancel_shipment(&self, shipment_id: &str) -> ProviderResult<()> {
        self.api
            .send(self.authorized(self.api.delete(&format!("/packs/{}", shipment_id))))
            .await
    }

    fn map_status(&self, native: &str) -> Option<ShipmentStatus> {
        map_shipment_status(native)
    }

    fn pickup_points(&self) -> Option<&dyn PickupPointSearch> {
        Some(self)
    }
}

#[async_trait]
impl PickupPointSearch for OrlenPaczkaProvider {
    async fn search_pickup_points(
        &self,
        query: &PickupPointQuery,
    ) -> ProviderResult<Vec<PickupPoint>> {
        let mut params = vec![("limit", query.limit.unwrap_or(DEFAULT_POINT_LIMIT).to_string())];
        if let Some(postal_code) = &query.postal_code {
            params.push(("zipCode", postal_code.clone()));
        }
        if let Some(city) = &query.city {
            params.push(("city", city.clone()));
        }
        if let (Some(lat), Some(lon)) = (query.latitude, query.longitude) {
            params.push(("latitude", lat.to_string()));
            params.push(("longitude", lon.to_string()));
        }

        let response: JsonValue = self
            .api
            .json(self.authorized(self.api.get("/points")).query(&params))
            .await?;
        Ok(response
            .get("points")
            .and_then(|v| v.as_array())
            .map(|points| points.iter().filter_map(to_pickup_point).collect())
            .unwrap_or_default())
    }
}

fn to_pickup_point(point: &JsonValue) -> Option<PickupPoint> {
    let id = pointer_str(point, "/code")?;
    let name = pointer_str(point, "/name").unwrap_or_else(|| id.clone());
    Some(PickupPoint {
        address: Address {
            name: name.clone(),
            company: None,
            street: pointer_str(point, "/streetName").unwrap_or_default(),
            city: pointer_str(point, "/city").unwrap_or_default(),
            postal_code: pointer_str(point, "/zipCode").unwrap_or_default(),
            country_code: "PL".to_string(),
            phone: None,
        },
        id,
        name,
        latitude: point.get("latitude").and_then(|v| v.as_f64()),
        longitude: point.get("longitude").and_then(|v| v.as_f64()),
        opening_hours: pointer_str(point, "/openingHours"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use marketsync_core::ShipmentParty;

    fn provider(base_url: &str) -> OrlenPaczkaProvider {
        OrlenPaczkaProvider::from_config(
            Client::new(),
            &json!({"partner_id": "P1", "partner_key": "K1"}),
            &json!({"api_base_url": base_url}),
        )
        .unwrap()
    }

    #[test]
    fn test_status_table() {
        assert_eq!(map_shipment_status("READY_TO_PICKUP"), Some(ShipmentStatus::OutForDelivery));
        assert_eq!(map_shipment_status("PICKED_UP"), Some(ShipmentStatus::Delivered));
        assert_eq!(map_shipment_status("NOT_PICKED_UP"), None);
    }

    #[tokio::test]
    async fn test_shipment_without_pickup_point_is_rejected() {
        let request = ShipmentRequest {
            reference: "ORD-3".to_string(),
            sender: ShipmentParty::default(),
            receiver: ShipmentParty::default(),
            parcels: vec![],
            service: None,
            pickup_point_id: None,
            cod_amount: None,
            insurance_amount: None,
            currency: "PLN".to_string(),
        };
        let err = provider("http://127.0.0.1:9").create_shipment(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidSettings(_)));
    }

    #[tokio::test]
    async fn test_history_is_sorted_oldest_first() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/packs/ORL123/history").header("PartnerID", "P1");
                then.status(200).json_body(json!({"history": [
                    {"date": "2024-09-05T11:00:00", "status": "READY_TO_PICKUP", "pointName": "ORLEN Krakow"},
                    {"date": "2024-09-04T09:00:00", "status": "SENT"}
                ]}));
            })
            .await;

        let events = provider(&server.base_url()).get_tracking("ORL123").await.unwrap();
        assert_eq!(events[0].status, "SENT");
        assert_eq!(events[1].location.as_deref(), Some("ORLEN Krakow"));
    }
}
