//! UPS REST adapter (client-credentials OAuth)

use super::oldest_first;
use crate::config::{parse_credentials, ProviderSettings};
use crate::http::ApiClient;
use crate::normalize::{lookup_status, pointer_str};
use crate::oauth::{client_credentials_token, ClientAuth, OAuthClientConfig, TokenCache};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDateTime, Utc};
use marketsync_core::{
    LabelFormat, ShipmentParty, ShipmentRequest, ShipmentResponse, ShipmentStatus, TrackingEvent,
};
use marketsync_registry::{CarrierProvider, CarrierRegistration, ProviderError, ProviderResult};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

pub const NAME: &str = "ups";

const PRODUCTION_API: &str = "https://onlinetools.ups.com";
const SANDBOX_API: &str = "https://wwwcie.ups.com";
const API_VERSION: &str = "v2409";
const DEFAULT_SERVICE: &str = "11";

/// Activity status types. `X` (exception) has no canonical status.
const STATUS_TABLE: &[(&str, ShipmentStatus)] = &[
    ("M", ShipmentStatus::Created),
    ("MV", ShipmentStatus::Cancelled),
    ("P", ShipmentStatus::PickedUp),
    ("I", ShipmentStatus::InTransit),
    ("O", ShipmentStatus::OutForDelivery),
    ("D", ShipmentStatus::Delivered),
    ("RS", ShipmentStatus::Returned),
];

pub fn map_shipment_status(native: &str) -> Option<ShipmentStatus> {
    lookup_status(STATUS_TABLE, native)
}

pub fn registration(http: Client) -> CarrierRegistration {
    CarrierRegistration::new(NAME, move |credentials, settings| {
        let provider = UpsProvider::from_config(http.clone(), credentials, settings)?;
        Ok(Box::new(provider) as Box<dyn CarrierProvider>)
    })
}

#[derive(serde::Deserialize)]
struct UpsCredentials {
    client_id: String,
    client_secret: String,
    account_number: String,
    #[serde(default)]
    sandbox: bool,
}

pub struct UpsProvider {
    api: ApiClient,
    credentials: UpsCredentials,
    oauth: OAuthClientConfig,
    tokens: TokenCache,
}

impl UpsProvider {
    pub fn from_config(
        http: Client,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> ProviderResult<Self> {
        let credentials: UpsCredentials =
            parse_credentials(credentials, &["client_id", "client_secret", "account_number"])?;
        let mut settings = ProviderSettings::from_value(settings)?;
        settings.sandbox |= credentials.sandbox;

        let base_url = settings.base_url(PRODUCTION_API, SANDBOX_API);
        let token_url = settings
            .token_url
            .clone()
            .unwrap_or_else(|| format!("{}/security/v1/oauth/token", base_url));

        Ok(Self {
            oauth: OAuthClientConfig::new(
                http.clone(),
                credentials.client_id.clone(),
                credentials.client_secret.clone(),
                token_url,
                ClientAuth::BasicHeader,
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
        Ok(request
            .bearer_auth(token)
            .header("transId", Uuid::new_v4().simple().to_string())
            .header("transactionSrc", "marketsync"))
    }
}

fn party_json(party: &ShipmentParty, account_number: Option<&str>) -> JsonValue {
    let mut value = json!({
        "Name": party.address.company.clone().unwrap_or_else(|| party.address.name.clone()),
        "AttentionName": party.address.name,
        "Phone": {"Number": party.address.phone},
        "EMailAddress": party.email,
        "Address": {
            "AddressLine": [party.address.street],
            "City": party.address.city,
            "PostalCode": party.address.postal_code,
            "CountryCode": party.address.country_code,
        }
    });
    if let Some(account) = account_number {
        value["ShipperNumber"] = json!(account);
    }
    value
}

fn label_code(format: LabelFormat) -> &'static str {
    match format {
        LabelFormat::Pdf => "PDF",
        LabelFormat::Zpl => "ZPL",
        LabelFormat::Epl => "EPL",
    }
}

/// UPS sends local date and time as separate `YYYYMMDD` / `HHMMSS` fields
fn activity_time(activity: &JsonValue) -> Option<DateTime<Utc>> {
    let date = pointer_str(activity, "/date")?;
    let time = pointer_str(activity, "/time").unwrap_or_else(|| "000000".to_string());
    NaiveDateTime::parse_from_str(&format!("{}{}", date, time), "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[async_trait]
impl CarrierProvider for UpsProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn create_shipment(&self, request: &ShipmentRequest) -> ProviderResult<ShipmentResponse> {
        let packages: Vec<JsonValue> = request
            .parcels
            .iter()
            .map(|p| {
                json!({
                    "Packaging": {"Code": "02"},
                    "Dimensions": {
                        "UnitOfMeasurement": {"Code": "CM"},
                        "Length": p.length_cm.to_string(),
                        "Width": p.width_cm.to_string(),
                        "Height": p.height_cm.to_string()
                    },
                    "PackageWeight": {"UnitOfMeasurement": {"Code": "KGS"}, "Weight": p.weight_kg.to_string()}
                })
            })
            .collect();

        let body = json!({"ShipmentRequest": {
            "Shipment": {
                "Description": request.reference,
                "Shipper": party_json(&request.sender, Some(&self.credentials.account_number)),
                "ShipTo": party_json(&request.receiver, None),
                "PaymentInformation": {"ShipmentCharge": {
                    "Type": "01",
                    "BillShipper": {"AccountNumber": self.credentials.account_number}
                }},
                "Service": {"Code": request.service.as_deref().unwrap_or(DEFAULT_SERVICE)},
                "Package": packages,
            },
            "LabelSpecification": {"LabelImageFormat": {"Code": "PDF"}}
        }});

        let path = format!("/api/shipments/{}/ship", API_VERSION);
        let response: JsonValue = self
            .api
            .json(self.authorized(self.api.post(&path)).await?.json(&body))
            .await?;
        let results = response
            .pointer("/ShipmentResponse/ShipmentResults")
            .ok_or_else(|| ProviderError::Decode("UPS response without ShipmentResults".to_string()))?;
        let external_id = pointer_str(results, "/ShipmentIdentificationNumber")
            .ok_or_else(|| ProviderError::Decode("UPS response without shipment id".to_string()))?;
        // PackageResults is an object for single-package shipments and an array otherwise
        let tracking_number = pointer_str(results, "/PackageResults/TrackingNumber")
            .or_else(|| pointer_str(results, "/PackageResults/0/TrackingNumber"));

        Ok(ShipmentResponse { external_id, tracking_number, status: ShipmentStatus::LabelReady })
    }

    /// Recovers a label for a shipment created earlier
    async fn get_label(&self, shipment_id: &str, format: LabelFormat) -> ProviderResult<Vec<u8>> {
        let body = json!({"LabelRecoveryRequest": {
            "TrackingNumber": shipment_id,
            "LabelSpecification": {"LabelImageFormat": {"Code": label_code(format)}}
        }});
        let response: JsonValue = self
            .api
            .json(self.authorized(self.api.post("/api/labels/v1/recovery")).await?.json(&body))
            .await?;

        let encoded = pointer_str(&response, "/LabelRecoveryResponse/LabelResults/LabelImage/GraphicImage")
            .or_else(|| pointer_str(&response, "/LabelRecoveryResponse/LabelResults/0/LabelImage/GraphicImage"))
            .ok_or_else(|| ProviderError::Decode("UPS response without label image".to_string()))?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| ProviderError::Decode(format!("label is not base64: {}", e)))
    }

    async fn get_tracking(&self, tracking_number: &str) -> ProviderResult<Vec<TrackingEvent>> {
        let path = format!("/api/track/v1/details/{}", tracking_number);
        let response: JsonValue = self.api.json(self.authorized(self.api.get(&path)).await?).await?;

        let activity = response
            .pointer("/trackResponse/shipment/0/package/0/activity")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let events = activity
            .iter()
            .filter_map(|entry| {
                Some(TrackingEvent {
                    occurred_at: activity_time(entry)?,
                    status: pointer_str(entry, "/status/type")?,
                    description: pointer_str(entry, "/status/description"),
                    location: pointer_str(entry, "/location/address/city"),
                })
            })
            .collect();
        Ok(oldest_first(events))
    }

    async fn cancel_shipment(&self, shipment_id: &str) -> ProviderResult<()> {
        let path = format!("/api/shipments/{}/void/cancel/{}", API_VERSION, shipment_id);
        self.api.send(self.authorized(self.api.delete(&path)).await?).await
    }

    fn map_status(&self, native: &str) -> Option<ShipmentStatus> {
        map_shipment_status(native)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn provider(base_url: &str) -> UpsProvider {
        UpsProvider::from_config(
            Client::new(),
            &json!({"client_id": "id", "client_secret": "secret", "account_number": "A1B2C3"}),
            &json!({"api_base_url": base_url}),
        )
        .unwrap()
    }

    #[test]
    fn test_status_table() {
        assert_eq!(map_shipment_status("P"), Some(ShipmentStatus::PickedUp));
        assert_eq!(map_shipment_status("D"), Some(ShipmentStatus::Delivered));
        assert_eq!(map_shipment_status("X"), None);
    }

    #[test]
    fn test_activity_time() {
        let ts = activity_time(&json!({"date": "20240903", "time": "142500"})).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-09-03T14:25:00+00:00");
        assert!(activity_time(&json!({"time": "142500"})).is_none());
    }

    #[tokio::test]
    async fn test_tracking_with_basic_auth_token_exchange() {
        let server = MockServer::start_async().await;
        let token = server
            .mock_async(|when, then| {
                // base64("id:secret")
                when.method(POST)
                    .path("/security/v1/oauth/token")
                    .header("Authorization", "Basic aWQ6c2VjcmV0");
                then.status(200).json_body(json!({
                    "access_token": "ups-token",
                    "token_type": "Bearer",
                    "expires_in": 14399
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/track/v1/details/1Z999AA10123456784")
                    .header("Authorization", "Bearer ups-token")
                    .header_exists("transId");
                then.status(200).json_body(json!({"trackResponse": {"shipment": [{"package": [{
                    "activity": [
                        {"date": "20240903", "time": "120000", "status": {"type": "D", "description": "DELIVERED"}},
                        {"date": "20240902", "time": "080000", "status": {"type": "I"},
                         "location": {"address": {"city": "Koeln"}}},
                        {"date": "20240901", "time": "170000", "status": {"type": "P"}}
                    ]
                }]}]}}));
            })
            .await;

        let events = provider(&server.base_url())
            .get_tracking("1Z999AA10123456784")
            .await
            .unwrap();
        token.assert_async().await;
        let statuses: Vec<_> = events.iter().map(|e| e.status.as_str()).collect();
        assert_eq!(statuses, ["P", "I", "D"]);
        assert_eq!(events[1].location.as_deref(), Some("Koeln"));
    }
}
