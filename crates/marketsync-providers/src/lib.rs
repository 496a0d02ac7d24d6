//! Marketplace and carrier adapters.
//!
//! Each adapter module exposes a `registration(http)` function; the lists
//! below are what the process hands to [`ProviderRegistry::from_registrations`]
//! at startup.

pub mod carriers;
pub mod config;
pub mod http;
pub mod marketplaces;
pub mod normalize;
pub mod oauth;
pub mod signing;

pub use config::{parse_credentials, ProviderSettings};
pub use http::{build_http_client, ApiClient, HttpSettings};
pub use signing::{sign_hex, verify_webhook_signature};

use marketsync_registry::{
    CarrierRegistration, MarketplaceRegistration, ProviderRegistry, RegistryResult,
};
use reqwest::Client;

pub fn marketplace_registrations(http: &Client) -> Vec<MarketplaceRegistration> {
    marketplaces::registrations(http)
}

pub fn carrier_registrations(http: &Client) -> Vec<CarrierRegistration> {
    carriers::registrations(http)
}

/// Registry holding every built-in adapter, all sharing one HTTP client
pub fn build_registry(http: &Client) -> RegistryResult<ProviderRegistry> {
    ProviderRegistry::from_registrations(
        marketplace_registrations(http),
        carrier_registrations(http),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_lists_every_adapter() {
        let registry = build_registry(&Client::new()).unwrap();
        assert_eq!(
            registry.marketplace_names(),
            ["allegro", "amazon", "ebay", "erli", "kaufland", "mirakl", "olx", "woocommerce"]
        );
        assert_eq!(
            registry.carrier_names(),
            ["dhl", "dpd", "fedex", "gls", "inpost", "orlen_paczka", "poczta_polska", "ups"]
        );
        assert_eq!(registry.refreshable_marketplaces(), ["allegro", "ebay", "olx"]);
    }

    #[test]
    fn test_unknown_provider_is_an_error() {
        let registry = build_registry(&Client::new()).unwrap();
        assert!(registry.build_marketplace("etsy", &json!({}), &json!({})).is_err());
        assert!(registry.build_carrier("royal_mail", &json!({}), &json!({})).is_err());
    }

    #[test]
    fn test_missing_fields_fail_construction() {
        let registry = build_registry(&Client::new()).unwrap();
        for name in registry.marketplace_names() {
            assert!(
                registry.build_marketplace(&name, &json!({}), &json!({})).is_err(),
                "{} accepted empty credentials",
                name
            );
        }
        for name in registry.carrier_names() {
            assert!(
                registry.build_carrier(&name, &json!({}), &json!({})).is_err(),
                "{} accepted empty credentials",
                name
            );
        }
    }
}
