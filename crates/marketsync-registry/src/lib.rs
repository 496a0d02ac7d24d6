pub mod error;
pub mod provider;
pub mod registry;

// Re-export commonly used types
pub use error::{ProviderError, ProviderResult, RegistryError, RegistryResult};
pub use provider::{
    CarrierProvider, InventorySync, MarketplaceProvider, OfferSync, PickupPointSearch, PollResult,
    RefreshedTokens, RejectedOrder, TokenRefresher,
};
pub use registry::{
    CarrierConstructor, CarrierRegistration, MarketplaceConstructor, MarketplaceRegistration,
    OrderMapper, ProviderRegistry,
};
