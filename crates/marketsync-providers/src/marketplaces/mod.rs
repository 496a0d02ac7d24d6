pub mod allegro;
pub mod amazon;
pub mod ebay;
pub mod erli;
pub mod kaufland;
pub mod mirakl;
pub mod olx;
pub mod woocommerce;

use marketsync_registry::MarketplaceRegistration;
use reqwest::Client;

/// Every marketplace adapter, each constructor sharing `http`
pub fn registrations(http: &Client) -> Vec<MarketplaceRegistration> {
    vec![
        allegro::registration(http.clone()),
        amazon::registration(http.clone()),
        ebay::registration(http.clone()),
        mirakl::registration(http.clone()),
        woocommerce::registration(http.clone()),
        kaufland::registration(http.clone()),
        olx::registration(http.clone()),
        erli::registration(http.clone()),
    ]
}
