use httpmock::prelude::*;
use marketsync_core::{PickupPointQuery, ShipmentStatus};
use marketsync_providers::build_registry;
use marketsync_registry::{CarrierProvider, ProviderError};
use reqwest::Client;
use serde_json::json;

fn inpost(base_url: &str) -> Box<dyn CarrierProvider> {
    build_registry(&Client::new())
        .expect("registry")
        .build_carrier(
            "inpost",
            &json!({"api_token": "shipx-token", "organization_id": "1234"}),
            &json!({"api_base_url": base_url}),
        )
        .expect("carrier")
}

#[tokio::test]
async fn inpost_tracking_is_returned_oldest_first() {
    let server = MockServer::start_async().await;
    let tracking = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v1/tracking/520000011395200025754311")
                .header("Authorization", "Bearer shipx-token");
            then.status(200).json_body(json!({"tracking_details": [
                {"status": "delivered", "datetime": "2024-09-03T12:10:00.000+02:00", "agency": "KRA01M"},
                {"status": "out_for_delivery", "datetime": "2024-09-03T08:00:00.000+02:00"},
                {"status": "collected_from_sender", "datetime": "2024-09-02T16:30:00.000+02:00"}
            ]}));
        })
        .await;

    let carrier = inpost(&server.base_url());
    let events = carrier
        .get_tracking("520000011395200025754311")
        .await
        .expect("tracking");

    tracking.assert_async().await;
    let statuses: Vec<_> = events.iter().map(|e| e.status.as_str()).collect();
    assert_eq!(statuses, ["collected_from_sender", "out_for_delivery", "delivered"]);
    let last = events.last().expect("latest event");
    assert_eq!(carrier.map_status(&last.status), Some(ShipmentStatus::Delivered));
    assert_eq!(last.location.as_deref(), Some("KRA01M"));
}

#[tokio::test]
async fn inpost_unknown_parcel_surfaces_api_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/tracking/000");
            then.status(404).json_body(json!({"error": "resource_not_found"}));
        })
        .await;

    let err = inpost(&server.base_url()).get_tracking("000").await.unwrap_err();
    assert!(matches!(err, ProviderError::Api { status: 404, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn inpost_pickup_point_search() {
    let server = MockServer::start_async().await;
    let points = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v1/points")
                .query_param("relative_post_code", "30-001")
                .query_param("per_page", "2")
                .query_param("type", "parcel_locker");
            then.status(200).json_body(json!({"items": [
                {
                    "name": "KRA01M",
                    "location_description": "Przy sklepie Żabka",
                    "address_details": {
                        "street": "Długa", "building_number": "5",
                        "city": "Kraków", "post_code": "30-001"
                    },
                    "location": {"latitude": 50.0686, "longitude": 19.9368}
                },
                {"name": "KRA02M", "address_details": {"city": "Kraków", "post_code": "30-002"}}
            ]}));
        })
        .await;

    let carrier = inpost(&server.base_url());
    assert!(carrier.supports_pickup_points());
    let query = PickupPointQuery {
        postal_code: Some("30-001".to_string()),
        limit: Some(2),
        ..Default::default()
    };
    let found = carrier.search_pickup_points(&query).await.expect("points");

    points.assert_async().await;
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].id, "KRA01M");
    assert_eq!(found[0].name, "Przy sklepie Żabka");
    assert_eq!(found[0].address.city, "Kraków");
    assert_eq!(found[1].name, "KRA02M");
}

#[tokio::test]
async fn carriers_without_pickup_points_refuse_search() {
    let carrier = build_registry(&Client::new())
        .expect("registry")
        .build_carrier(
            "dpd",
            &json!({"login": "l", "password": "p", "fid": "1495"}),
            &json!({"api_base_url": "http://127.0.0.1:9"}),
        )
        .expect("carrier");

    assert!(!carrier.supports_pickup_points());
    let err = carrier
        .search_pickup_points(&PickupPointQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::NotSupported { .. }));
}
