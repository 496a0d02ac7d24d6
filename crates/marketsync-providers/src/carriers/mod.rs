pub mod dhl;
pub mod dpd;
pub mod fedex;
pub mod gls;
pub mod inpost;
pub mod orlen_paczka;
pub mod poczta_polska;
pub mod ups;

use marketsync_core::TrackingEvent;
use marketsync_registry::CarrierRegistration;
use reqwest::Client;

/// Every carrier adapter, each constructor sharing `http`
pub fn registrations(http: &Client) -> Vec<CarrierRegistration> {
    vec![
        inpost::registration(http.clone()),
        dhl::registration(http.clone()),
        dpd::registration(http.clone()),
        fedex::registration(http.clone()),
        gls::registration(http.clone()),
        ups::registration(http.clone()),
        poczta_polska::registration(http.clone()),
        orlen_paczka::registration(http.clone()),
    ]
}

/// Carriers disagree on event order; callers always get the oldest first.
/// The sort is stable so same-instant events keep the carrier's order.
pub(crate) fn oldest_first(mut events: Vec<TrackingEvent>) -> Vec<TrackingEvent> {
    events.sort_by_key(|event| event.occurred_at);
    events
}
