pub mod error;
pub mod sanitization;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, CoreResult};
pub use sanitization::{create_debug_string, is_sensitive_field, sanitize_json_value};
pub use store::{AdminStore, LeaseStore, TenantStore};
pub use types::{
    Address, Customer, InsertOutcome, IntegrationStatus, LabelFormat, LineItem, NewOrder,
    NormalizedOrder, Offer, OrderExtras, OrderStatus, Parcel, PaymentStatus, PickupPoint,
    PickupPointQuery, ShipmentParty, ShipmentRequest, ShipmentResponse, ShipmentStatus,
    TenantIntegration, TrackableShipment, TrackingEvent,
};
