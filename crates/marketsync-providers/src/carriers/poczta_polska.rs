//! Poczta Polska adapter: e-Nadawca shipments, tracking service and post office search

use super::oldest_first;
use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{lookup_status, parse_timestamp, pointer_str, to_minor_units};
use async_trait::async_trait;
use marketsync_core::{
    Address, LabelFormat, PickupPoint, PickupPointQuery, ShipmentParty, ShipmentRequest,
    ShipmentResponse, ShipmentStatus, TrackingEvent,
};
use marketsync_registry::{
    CarrierProvider, CarrierRegistration, PickupPointSearch, ProviderError, ProviderResult,
};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value as JsonValue};

pub const NAME: &str = "poczta_polska";

const PRODUCTION_API: &str = "https://api.poczta-polska.pl/v1";
const SANDBOX_API: &str = "https://api-sandbox.poczta-polska.pl/v1";
const DEFAULT_SERVICE: &str = "PACZKA_POCZTOWA";
const DEFAULT_POINT_LIMIT: u32 = 20;

const STATUS_TABLE: &[(&str, ShipmentStatus)] = &[
    ("P_REJ", ShipmentStatus::Created),
    ("P_NAD", ShipmentStatus::PickedUp),
    ("P_WYS", ShipmentStatus::InTransit),
    ("P_PRZ", ShipmentStatus::InTransit),
    ("P_WDD", ShipmentStatus::OutForDelivery),
    ("P_AWI", ShipmentStatus::OutForDelivery),
    ("P_DOR", ShipmentStatus::Delivered),
    ("P_ODB", ShipmentStatus::Delivered),
    ("P_ZWR", ShipmentStatus::Returned),
    ("P_ODM", ShipmentStatus::Failed),
    ("P_ANL", ShipmentStatus::Cancelled),
];

pub fn map_shipment_status(native: &str) -> Option<ShipmentStatus> {
    lookup_status(STATUS_TABLE, native)
}

pub fn registration(http: Client) -> CarrierRegistration {
    CarrierRegistration::new(NAME, move |credentials, settings| {
        let provider = PocztaPolskaProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn CarrierProvider>)
    })
}

#[derive(serde::Deserialize)]
struct PocztaPolskaCredentials {
    username: String,
    password: String,
    /// Key for the tracking and post office services
    api_key: String,
    #[serde(default)]
    sandbox: bool,
}

pub struct PocztaPolskaProvider {
    api: ApiClient,
    credentials: PocztaPolskaCredentials,
}

impl PocztaPolskaProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: PocztaPolskaCredentials =
            parse_credentials(credentials, &["username", "password", "api_key"])?;
        let mut settings = ProviderSettings::from_value(settings)?;
        settings.sandbox |= credentials.sandbox;

        Ok(Self {
            api: ApiClient::new(http, settings.base_url(PRODUCTION_API, SANDBOX_API), NAME),
            credentials,
        })
    }

    fn sender_account(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.credentials.username, Some(&self.credentials.password))
    }

    fn public_service(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("api_key", &self.credentials.api_key)
    }
}

fn party_json(party: &ShipmentParty) -> JsonValue {
    json!({
        "nazwa": party.address.name,
        "nazwa2": party.address.company,
        "ulica": party.address.street,
        "kodPocztowy": party.address.postal_code.replace('-', ""),
        "miejscowosc": party.address.city,
        "kraj": party.address.country_code,
        "telefon": party.address.phone,
        "email": party.email,
    })
}

#[async_trait]
impl CarrierProvider for PocztaPolskaProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn create_shipment(&self, request: &ShipmentRequest) -> ProviderResult<ShipmentResponse> {
        let weight_grams: i64 = request
            .parcels
            .iter()
            .map(|p| to_minor_units(p.weight_kg) * 10)
            .sum();
        let mut body = json!({
            "guid": request.reference,
            "rodzaj": request.service.as_deref().unwrap_or(DEFAULT_SERVICE),
            "nadawca": party_json(&request.sender),
            "adresat": party_json(&request.receiver),
            "masa": weight_grams,
        });
        if let Some(cod) = request.cod_amount {
            body["pobranie"] = json!({"kwota": to_minor_units(cod), "sposobPobrania": "RACHUNEK_BANKOWY"});
        }
        if let Some(value) = request.insurance_amount {
            body["wartosc"] = json!(to_minor_units(value));
        }
        if let Some(office) = &request.pickup_point_id {
            body["urzadWydaniaPrzesylki"] = json!({"id": office});
        }

        let response: JsonValue = self
            .api
            .json(self.sender_account(self.api.post("/shipments")).json(&body))
            .await?;
        let guid = pointer_str(&response, "/guid")
            .ok_or_else(|| ProviderError::Decode("response without guid".to_string()))?;

        Ok(ShipmentResponse {
            external_id: guid,
            tracking_number: pointer_str(&response, "/numerNadania"),
            status: ShipmentStatus::Created,
        })
    }

    async fn get_label(&self, shipment_id: &str, format: LabelFormat) -> ProviderResult<Vec<u8>> {
        if format != LabelFormat::Pdf {
            return Err(ProviderError::not_supported(NAME, "get_label(non-pdf)"));
        }
        self.api
            .bytes(self.sender_account(self.api.get(&format!("/shipments/{}/label", shipment_id))))
            .await
    }

    async fn get_tracking(&self, tracking_number: &str) -> ProviderResult<Vec<TrackingEvent>> {
        let response: JsonValue = self
            .api
            .json(self.public_service(
                self.api.get("/tracking").query(&[("number", tracking_number)]),
            ))
            .await?;

        let history = response
            .pointer("/mailInfo/events")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let events = history
            .iter()
            .filter_map(|event| {
                Some(TrackingEvent {
                    occurred_at: parse_timestamp(&pointer_str(event, "/time")?)?,
                    status: pointer_str(event, "/code")?,
                    description: pointer_str(event, "/name"),
                    location: pointer_str(event, "/unit/name"),
                })
            })
            .collect();
        Ok(oldest_first(events))
    }

    async fn cancel_shipment(&self, shipment_id: &str) -> ProviderResult<()> {
        self.api
            .send(self.sender_account(self.api.delete(&format!("/shipments/{}", shipment_id))))
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
impl PickupPointSearch for PocztaPolskaProvider {
    async fn search_pickup_points(
        &self,
        query: &PickupPointQuery,
    ) -> ProviderResult<Vec<PickupPoint>> {
        let mut params = vec![("limit", query.limit.unwrap_or(DEFAULT_POINT_LIMIT).to_string())];
        if let Some(postal_code) = &query.postal_code {
            params.push(("postalCode", postal_code.clone()));
        }
        if let Some(city) = &query.city {
            params.push(("city", city.clone()));
        }
        if let (Some(lat), Some(lon)) = (query.latitude, query.longitude) {
            params.push(("latitude", lat.to_string()));
            params.push(("longitude", lon.to_string()));
        }

        let offices: Vec<JsonValue> = self
            .api
            .json(self.public_service(self.api.get("/offices")).query(&params))
            .await?;
        Ok(offices.iter().filter_map(to_pickup_point).collect())
    }
}

fn to_pickup_point(office: &JsonValue) -> Option<PickupPoint> {
    let id = pointer_str(office, "/id")?;
    let name = pointer_str(office, "/name").unwrap_or_else(|| id.clone());
    Some(PickupPoint {
        address: Address {
            name: name.clone(),
            company: None,
            street: pointer_str(office, "/street").unwrap_or_default(),
            city: pointer_str(office, "/city").unwrap_or_default(),
            postal_code: pointer_str(office, "/postalCode").unwrap_or_default(),
            country_code: "PL".to_string(),
            phone: pointer_str(office, "/phone"),
        },
        id,
        name,
        latitude: office.get("latitude").and_then(|v| v.as_f64()),
        longitude: office.get("longitude").and_then(|v| v.as_f64()),
        opening_hours: pointer_str(office, "/openingHours"),
    })
}
