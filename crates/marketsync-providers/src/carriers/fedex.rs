//! FedEx REST adapter (client-credentials OAuth)

use super::oldest_first;
use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{lookup_status, parse_timestamp, pointer_str};
use crate::oauth::{client_credentials_token, ClientAuth, OAuthClientConfig, TokenCache};
use async_trait::async_trait;
use marketsync_core::{
    LabelFormat, ShipmentParty, ShipmentRequest, ShipmentResponse, ShipmentStatus, TrackingEvent,
};
use marketsync_registry::{CarrierProvider, CarrierRegistration, ProviderError, ProviderResult};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value as JsonValue};

pub const NAME: &str = "fedex";

const PRODUCTION_API: &str = "https://apis.fedex.com";
const SANDBOX_API: &str = "https://apis-sandbox.fedex.com";
const DEFAULT_SERVICE: &str = "FEDEX_INTERNATIONAL_PRIORITY";

const STATUS_TABLE: &[(&str, ShipmentStatus)] = &[
    ("OC", ShipmentStatus::Created),
    ("PU", ShipmentStatus::PickedUp),
    ("IT", ShipmentStatus::InTransit),
    ("AR", ShipmentStatus::InTransit),
    ("DP", ShipmentStatus::InTransit),
    ("CC", ShipmentStatus::InTransit),
    ("OD", ShipmentStatus::OutForDelivery),
    ("DL", ShipmentStatus::Delivered),
    ("RS", ShipmentStatus::Returned),
    ("CA", ShipmentStatus::Cancelled),
];

pub fn map_shipment_status(native: &str) -> Option<ShipmentStatus> {
    lookup_status(STATUS_TABLE, native)
}

pub fn registration(http: Client) -> CarrierRegistration {
    CarrierRegistration::new(NAME, move |credentials, settings| {
        let provider = FedExProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn CarrierProvider>)
    })
}

#[derive(serde::Deserialize)]
struct FedExCredentials {
    client_id: String,
    client_secret: String,
    account_number: String,
    #[serde(default)]
    sandbox: bool,
}

pub struct FedExProvider {
    api: ApiClient,
    credentials: FedExCredentials,
    oauth: OAuthClientConfig,
    tokens: TokenCache,
}

impl FedExProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: FedExCredentials =
            parse_credentials(credentials, &["client_id", "client_secret", "account_number"])?;
        let mut settings = ProviderSettings::from_value(settings)?;
        settings.sandbox |= credentials.sandbox;

        let base_url = settings.base_url(PRODUCTION_API, SANDBOX_API);
        let token_url = settings
            .token_url
            .clone()
            .unwrap_or_else(|| format!("{}/oauth/token", base_url));

        Ok(Self {
            oauth: OAuthClientConfig::new(
                http.clone(),
                credentials.client_id.clone(),
                credentials.client_secret.clone(),
                token_url,
                ClientAuth::RequestBody,
            ),
            api: ApiClient::new(http, base_url, NAME),
            tokens: TokenCache::new(),
            credentials,
        })
    }

    async fn authorized(&self, request: RequestBuilder) -> ProviderResult<RequestBuilder> {
        let token = self
            .tokens
            .get_or_fetch(|| client_credentials_token(&self.oauth, &[]))
            .await?;
        Ok(request.bearer_auth(token).header("X-locale", "en_US"))
    }
}

fn party_json(party: &ShipmentParty) -> JsonValue {
    json!({
        "contact": {
            "personName": party.address.name,
            "companyName": party.address.company,
            "phoneNumber": party.address.phone,
            "emailAddress": party.email,
        },
        "address": {
            "streetLines": [party.address.street],
            "city": party.address.city,
            "postalCode": party.address.postal_code,
            "countryCode": party.address.country_code,
        }
    })
}

#[async_trait]
impl CarrierProvider for FedExProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn create_shipment(&self, request: &ShipmentRequest) -> ProviderResult<ShipmentResponse> {
        let packages: Vec<JsonValue> = request
            .parcels
            .iter()
            .map(|p| {
                json!({
                    "weight": {"units": "KG", "value": p.weight_kg.to_string()},
                    "dimensions": {
                        "length": p.length_cm,
                        "width": p.width_cm,
                        "height": p.height_cm,
                        "units": "CM"
                    },
                    "customerReferences": [{"customerReferenceType": "CUSTOMER_REFERENCE", "value": request.reference}]
                })
            })
            .collect();

        let body = json!({
            "labelResponseOptions": "LABEL",
            "accountNumber": {"value": self.credentials.account_number},
            "requestedShipment": {
                "shipper": party_json(&request.sender),
                "recipients": [party_json(&request.receiver)],
                "serviceType": request.service.as_deref().unwrap_or(DEFAULT_SERVICE),
                "packagingType": "YOUR_PACKAGING",
                "pickupType": "USE_SCHEDULED_PICKUP",
                "shippingChargesPayment": {"paymentType": "SENDER"},
                "labelSpecification": {"imageType": "PDF", "labelStockType": "PAPER_85X11_TOP_HALF_LABEL"},
                "requestedPackageLineItems": packages,
            }
        });

        let response: JsonValue = self
            .api
            .json(self.authorized(self.api.post("/ship/v1/shipments")).await?.json(&body))
            .await?;
        let tracking = pointer_str(&response, "/output/transactionShipments/0/masterTrackingNumber")
            .ok_or_else(|| ProviderError::Decode("FedEx response without tracking number".to_string()))?;

        Ok(ShipmentResponse {
            external_id: tracking.clone(),
            tracking_number: Some(tracking),
            status: ShipmentStatus::LabelReady,
        })
    }

    /// Labels are only issued inline with the create call
    async fn get_label(&self, _shipment_id: &str, _format: LabelFormat) -> ProviderResult<Vec<u8>> {
        Err(ProviderError::not_supported(NAME, "get_label"))
    }

    async fn get_tracking(&self, tracking_number: &str) -> ProviderResult<Vec<TrackingEvent>> {
        let body = json!({
            "includeDetailedScans": true,
            "trackingInfo": [{"trackingNumberInfo": {"trackingNumber": tracking_number}}]
        });
        let response: JsonValue = self
            .api
            .json(self.authorized(self.api.post("/track/v1/trackingnumbers")).await?.json(&body))
            .await?;

        let scans = response
            .pointer("/output/completeTrackResults/0/trackResults/0/scanEvents")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let events = scans
            .iter()
            .filter_map(|scan| {
                Some(TrackingEvent {
                    occurred_at: parse_timestamp(&pointer_str(scan, "/date")?)?,
                    status: pointer_str(scan, "/eventType")?,
                    description: pointer_str(scan, "/eventDescription"),
                    location: pointer_str(scan, "/scanLocation/city"),
                })
            })
            .collect();
        Ok(oldest_first(events))
    }

    async fn cancel_shipment(&self, shipment_id: &str) -> ProviderResult<()> {
        let body = json!({
            "accountNumber": {"value": self.credentials.account_number},
            "trackingNumber": shipment_id,
            "deletionControl": "DELETE_ALL_PACKAGES"
        });
        self.api
            .send(self.authorized(self.api.put("/ship/v1/shipments/cancel")).await?.json(&body))
            .await
    }

    fn map_status(&self, native: &str) -> Option<ShipmentStatus> {
        map_shipment_status(native)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_status_table() {
        assert_eq!(map_shipment_status("PU"), Some(ShipmentStatus::PickedUp));
        assert_eq!(map_shipment_status("od"), Some(ShipmentStatus::OutForDelivery));
        assert_eq!(map_shipment_status("DL"), Some(ShipmentStatus::Delivered));
        assert_eq!(map_shipment_status("ZZ"), None);
    }

    #[tokio::test]
    async fn test_label_is_not_supported_without_io() {
        let provider = FedExProvider::from_config(
            Client::new(),
            &json!({"client_id": "id", "client_secret": "s", "account_number": "740561073"}),
            &json!({"api_base_url": "http://127.0.0.1:9"}),
        )
        .unwrap();
        let err = provider.get_label("794000000000", LabelFormat::Pdf).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotSupported { .. }));
    }

    #[tokio::test]
    async fn test_tracking_fetches_token_once() {
        let server = MockServer::start_async().await;
        let token = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth/token")
                    .body_contains("grant_type=client_credentials");
                then.status(200).json_body(json!({
                    "access_token": "fx-token",
                    "token_type": "bearer",
                    "expires_in": 3599
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/track/v1/trackingnumbers")
                    .header("Authorization", "Bearer fx-token");
                then.status(200).json_body(json!({"output": {"completeTrackResults": [{
                    "trackResults": [{"scanEvents": [
                        {"date": "2024-09-02T09:00:00+02:00", "eventType": "DL", "eventDescription": "Delivered"},
                        {"date": "2024-09-01T09:00:00+02:00", "eventType": "PU", "scanLocation": {"city": "Warsaw"}}
                    ]}]
                }]}}));
            })
            .await;

        let provider = FedExProvider::from_config(
            Client::new(),
            &json!({"client_id": "id", "client_secret": "s", "account_number": "740561073"}),
            &json!({"api_base_url": server.base_url()}),
        )
        .unwrap();

        for _ in 0..2 {
            let events = provider.get_tracking("794000000000").await.unwrap();
            assert_eq!(events.first().map(|e| e.status.as_str()), Some("PU"));
            assert_eq!(events.last().map(|e| e.status.as_str()), Some("DL"));
        }
        token.assert_hits_async(1).await;
    }
}
