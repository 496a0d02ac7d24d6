pub mod integration;
pub mod order;
pub mod shipment;

pub use integration::{IntegrationStatus, TenantIntegration};
pub use order::{
    Address, Customer, InsertOutcome, LineItem, NewOrder, NormalizedOrder, Offer, OrderExtras,
    OrderStatus, PaymentStatus,
};
pub use shipment::{
    LabelFormat, Parcel, PickupPoint, PickupPointQuery, ShipmentParty, ShipmentRequest,
    ShipmentResponse, ShipmentStatus, TrackableShipment, TrackingEvent,
};
