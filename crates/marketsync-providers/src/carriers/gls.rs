//! GLS ShipIT adapter with ParcelShop search

use super::oldest_first;
use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{lookup_status, parse_timestamp, pointer_str};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use marketsync_core::{
    Address, LabelFormat, PickupPoint, PickupPointQuery, ShipmentParty, ShipmentRequest,
    ShipmentResponse, ShipmentStatus, TrackingEvent,
};
use marketsync_registry::{
    CarrierProvider, CarrierRegistration, PickupPointSearch, ProviderError, ProviderResult,
};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value as JsonValue};

pub const NAME: &str = "gls";

const PRODUCTION_API: &str = "https://shipit.gls-group.eu/backend/rs";
const SANDBOX_API: &str = "https://shipit-wbm-test01.gls-group.eu/backend/rs";
const DEFAULT_PRODUCT: &str = "PARCEL";
const DEFAULT_POINT_LIMIT: u32 = 20;

const STATUS_TABLE: &[(&str, ShipmentStatus)] = &[
    ("PREADVICE", ShipmentStatus::Created),
    ("INPICKUP", ShipmentStatus::PickedUp),
    ("INWAREHOUSE", ShipmentStatus::InTransit),
    ("INTRANSIT", ShipmentStatus::InTransit),
    ("INDELIVERY", ShipmentStatus::OutForDelivery),
    ("INPARCELSHOP", ShipmentStatus::OutForDelivery),
    ("DELIVERED", ShipmentStatus::Delivered),
    ("DELIVEREDPS", ShipmentStatus::Delivered),
    ("RETURNED", ShipmentStatus::Returned),
    ("NOTDELIVERED", ShipmentStatus::Failed),
    ("CANCELED", ShipmentStatus::Cancelled),
];

pub fn map_shipment_status(native: &str) -> Option<ShipmentStatus> {
    lookup_status(STATUS_TABLE, native)
}

pub fn registration(http: Client) -> CarrierRegistration {
    CarrierRegistration::new(NAME, move |credentials, settings| {
        let provider = GlsProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn CarrierProvider>)
    })
}

#[derive(serde::Deserialize)]
struct GlsCredentials {
    username: String,
    password: String,
    shipper_id: String,
    #[serde(default)]
    sandbox: bool,
}

pub struct GlsProvider {
    api: ApiClient,
    credentials: GlsCredentials,
}

impl GlsProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: GlsCredentials =
            parse_credentials(credentials, &["username", "password", "shipper_id"])?;
        let mut settings = ProviderSettings::from_value(settings)?;
        settings.sandbox |= credentials.sandbox;

        Ok(Self {
            api: ApiClient::new(http, settings.base_url(PRODUCTION_API, SANDBOX_API), NAME),
            credentials,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.credentials.username, Some(&self.credentials.password))
    }
}

fn label_format(format: LabelFormat) -> &'static str {
    match format {
        LabelFormat::Pdf => "PDF",
        LabelFormat::Zpl => "ZEBRA",
        LabelFormat::Epl => "INTERMEC",
    }
}

fn party_json(party: &ShipmentParty) -> JsonValue {
    json!({
        "Name1": party.address.name,
        "Name2": party.address.company,
        "Street": party.address.street,
        "ZIPCode": party.address.postal_code,
        "City": party.address.city,
        "CountryCode": party.address.country_code,
        "eMail": party.email,
        "MobilePhoneNumber": party.address.phone,
    })
}

fn decode_print_data(response: &JsonValue) -> ProviderResult<Vec<u8>> {
    let encoded = pointer_str(response, "/PrintData/0/Data")
        .ok_or_else(|| ProviderError::Decode("GLS response without PrintData".to_string()))?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| ProviderError::Decode(format!("label is not base64: {}", e)))
}

#[async_trait]
impl CarrierProvider for GlsProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn create_shipment(&self, request: &ShipmentRequest) -> ProviderResult<ShipmentResponse> {
        let units: Vec<JsonValue> = request
            .parcels
            .iter()
            .map(|p| json!({"Weight": p.weight_kg.to_string(), "ShipmentUnitReference": [request.reference]}))
            .collect();
        let mut services = Vec::new();
        if let Some(point) = &request.pickup_point_id {
            services.push(json!({"ShopDelivery": {"ServiceName": "service_shopdelivery", "ParcelShopID": point}}));
        }
        if let Some(cod) = request.cod_amount {
            services.push(json!({"CashOnDelivery": {
                "ServiceName": "service_cash",
                "Amount": cod.to_string(),
                "Currency": request.currency,
                "Reason": request.reference
            }}));
        }

        let body = json!({
            "Shipment": {
                "ShipmentReference": [request.reference],
                "Product": request.service.as_deref().unwrap_or(DEFAULT_PRODUCT),
                "Consignee": {"Address": party_json(&request.receiver)},
                "Shipper": {
                    "ContactID": self.credentials.shipper_id,
                    "AlternativeShipperAddress": party_json(&request.sender)
                },
                "ShipmentUnit": units,
                "Service": services,
            },
            "PrintingOptions": {"ReturnLabels": {"TemplateSet": "NONE", "LabelFormat": "PDF"}}
        });

        let response: JsonValue = self
            .api
            .json(self.authorized(self.api.post("/shipments")).json(&body))
            .await?;
        let track_id = pointer_str(&response, "/CreatedShipment/ParcelData/0/TrackID")
            .ok_or_else(|| ProviderError::Decode("GLS response without TrackID".to_string()))?;

        Ok(ShipmentResponse {
            external_id: track_id,
            tracking_number: pointer_str(&response, "/CreatedShipment/ParcelData/0/ParcelNumber"),
            status: ShipmentStatus::LabelReady,
        })
    }

    async fn get_label(&self, shipment_id: &str, format: LabelFormat) -> ProviderResult<Vec<u8>> {
        let body = json!({
            "TrackID": shipment_id,
            "PrintingOptions": {
                "ReturnLabels": {"TemplateSet": "NONE", "LabelFormat": label_format(format)}
            }
        });
        let response: JsonValue = self
            .api
            .json(self.authorized(self.api.post("/shipments/reprintparcel")).json(&body))
            .await?;
        let data = response.get("CreatedShipment").unwrap_or(&response);
        decode_print_data(data)
    }

    async fn get_tracking(&self, tracking_number: &str) -> ProviderResult<Vec<TrackingEvent>> {
        let response: JsonValue = self
            .api
            .json(self.authorized(
                self.api.get(&format!("/tracking/parcels/{}", tracking_number)),
            ))
            .await?;

        let history = response
            .pointer("/parcels/0/events")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let events = history
            .iter()
            .filter_map(|event| {
                Some(TrackingEvent {
                    occurred_at: parse_timestamp(&pointer_str(event, "/timestamp")?)?,
                    status: pointer_str(event, "/code")?,
                    description: pointer_str(event, "/description"),
                    location: pointer_str(event, "/location"),
                })
            })
            .collect();
        Ok(oldest_first(events))
    }

    async fn cancel_shipment(&self, shipment_id: &str) -> ProviderResult<()> {
        self.api
            .send(self.authorized(self.api.post(&format!("/shipments/cancel/{}", shipment_id))))
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
impl PickupPointSearch for GlsProvider {
    async fn search_pickup_points(
        &self,
        query: &PickupPointQuery,
    ) -> ProviderResult<Vec<PickupPoint>> {
        let mut params = vec![("limit", query.limit.unwrap_or(DEFAULT_POINT_LIMIT).to_string())];
        if let Some(postal_code) = &query.postal_code {
            params.push(("zipcode", postal_code.clone()));
        }
        if let Some(city) = &query.city {
            params.push(("city", city.clone()));
        }
        if let (Some(lat), Some(lon)) = (query.latitude, query.longitude) {
            params.push(("lat", lat.to_string()));
            params.push(("lng", lon.to_string()));
        }

        let shops: Vec<JsonValue> = self
            .api
            .json(self.authorized(self.api.get("/parcelshops")).query(&params))
            .await?;
        Ok(shops.iter().filter_map(to_pickup_point).collect())
    }
}

fn to_pickup_point(shop: &JsonValue) -> Option<PickupPoint> {
    let id = pointer_str(shop, "/parcelShopId")?;
    let name = pointer_str(shop, "/name").unwrap_or_else(|| id.clone());
    Some(PickupPoint {
        address: Address {
            name: name.clone(),
            company: None,
            street: pointer_str(shop, "/address/street").unwrap_or_default(),
            city: pointer_str(shop, "/address/city").unwrap_or_default(),
            postal_code: pointer_str(shop, "/address/zipCode").unwrap_or_default(),
            country_code: pointer_str(shop, "/address/countryCode").unwrap_or_default(),
            phone: pointer_str(shop, "/phone"),
        },
        id,
        name,
        latitude: shop.pointer("/location/lat").and_then(|v| v.as_f64()),
        longitude: shop.pointer("/location/lng").and_then(|v| v.as_f64()),
        opening_hours: pointer_str(shop, "/openingHours"),
    })
}
