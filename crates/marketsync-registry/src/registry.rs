//! Name-to-constructor tables for marketplace and carrier adapters

use crate::{
    error::{ProviderResult, RegistryError, RegistryResult},
    provider::{CarrierProvider, MarketplaceProvider},
};
use marketsync_core::{NormalizedOrder, OrderExtras};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a marketplace adapter from `(credentials, settings)`
pub type MarketplaceConstructor = Arc<
    dyn Fn(&JsonValue, &JsonValue) -> ProviderResult<Box<dyn MarketplaceProvider>> + Send + Sync,
>;

/// Builds a carrier adapter from `(credentials, settings)`
pub type CarrierConstructor =
    Arc<dyn Fn(&JsonValue, &JsonValue) -> ProviderResult<Box<dyn CarrierProvider>> + Send + Sync>;

/// Extracts provider-specific order columns from a normalized order
pub type OrderMapper = fn(&NormalizedOrder) -> OrderExtras;

#[derive(Clone)]
pub struct MarketplaceRegistration {
    pub name: String,
    pub constructor: MarketplaceConstructor,
    /// Falls back to the raw-data conventions when absent
    pub order_mapper: Option<OrderMapper>,
    /// Whether the OAuth refresher should visit this provider's integrations
    pub refreshable: bool,
}

impl MarketplaceRegistration {
    pub fn new<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&JsonValue, &JsonValue) -> ProviderResult<Box<dyn MarketplaceProvider>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            constructor: Arc::new(constructor),
            order_mapper: None,
            refreshable: false,
        }
    }

    pub fn with_order_mapper(mut self, mapper: OrderMapper) -> Self {
        self.order_mapper = Some(mapper);
        self
    }

    pub fn refreshable(mut self) -> Self {
        self.refreshable = true;
        self
    }
}

impl fmt::Debug for MarketplaceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketplaceRegistration")
            .field("name", &self.name)
            .field("order_mapper", &self.order_mapper.is_some())
            .field("refreshable", &self.refreshable)
            .finish()
    }
}

#[derive(Clone)]
pub struct CarrierRegistration {
    pub name: String,
    pub constructor: CarrierConstructor,
}

impl CarrierRegistration {
    pub fn new<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&JsonValue, &JsonValue) -> ProviderResult<Box<dyn CarrierProvider>>
            + Send
            + Sync
            + 'static,
    {
        Self { name: name.into(), constructor: Arc::new(constructor) }
    }
}

impl fmt::Debug for CarrierRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarrierRegistration").field("name", &self.name).finish()
    }
}

/// Registry of provider constructors.
///
/// Built once at startup and shared read-only behind an `Arc`.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    marketplaces: HashMap<String, MarketplaceRegistration>,
    carriers: HashMap<String, CarrierRegistration>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build both tables from explicit registration lists
    pub fn from_registrations(
        marketplaces: Vec<MarketplaceRegistration>,
        carriers: Vec<CarrierRegistration>,
    ) -> RegistryResult<Self> {
        let mut registry = Self::new();
        for registration in marketplaces {
            registry.register_marketplace(registration)?;
        }
        for registration in carriers {
            registry.register_carrier(registration)?;
        }
        Ok(registry)
    }

    pub fn register_marketplace(
        &mut self,
        registration: MarketplaceRegistration,
    ) -> RegistryResult<()> {
        if self.marketplaces.contains_key(&registration.name) {
            return Err(RegistryError::DuplicateRegistration(registration.name));
        }
        tracing::debug!(
            provider = %registration.name,
            refreshable = registration.refreshable,
            "registered marketplace"
        );
        self.marketplaces.insert(registration.name.clone(), registration);
        Ok(())
    }

    pub fn register_carrier(&mut self, registration: CarrierRegistration) -> RegistryResult<()> {
        if self.carriers.contains_key(&registration.name) {
            return Err(RegistryError::DuplicateRegistration(registration.name));
        }
        tracing::debug!(provider = %registration.name, "registered carrier");
        self.carriers.insert(registration.name.clone(), registration);
        Ok(())
    }

    /// Construct a marketplace adapter by name
    pub fn build_marketplace(
        &self,
        name: &str,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> RegistryResult<Box<dyn MarketplaceProvider>> {
        let registration = self
            .marketplaces
            .get(name)
            .ok_or_else(|| RegistryError::UnknownMarketplace(name.to_string()))?;
        (registration.constructor)(credentials, settings)
            .map_err(|source| RegistryError::Construction { provider: name.to_string(), source })
    }

    /// Construct a carrier adapter by name
    pub fn build_carrier(
        &self,
        name: &str,
        credentials: &JsonValue,
        settings: &JsonValue,
    ) -> RegistryResult<Box<dyn CarrierProvider>> {
        let registration = self
            .carriers
            .get(name)
            .ok_or_else(|| RegistryError::UnknownCarrier(name.to_string()))?;
        (registration.constructor)(credentials, settings)
            .map_err(|source| RegistryError::Construction { provider: name.to_string(), source })
    }

    /// Provider-specific columns for an order, using the registered mapper when present
    pub fn order_extras(&self, provider: &str, order: &NormalizedOrder) -> OrderExtras {
        match self.marketplaces.get(provider).and_then(|r| r.order_mapper) {
            Some(mapper) => mapper(order),
            None => OrderExtras::from_raw_conventions(&order.provider_raw_data),
        }
    }

    pub fn has_marketplace(&self, name: &str) -> bool {
        self.marketplaces.contains_key(name)
    }

    pub fn has_carrier(&self, name: &str) -> bool {
        self.carriers.contains_key(name)
    }

    pub fn marketplace_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.marketplaces.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn carrier_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.carriers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Marketplaces whose integrations hold refreshable OAuth tokens
    pub fn refreshable_marketplaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .marketplaces
            .values()
            .filter(|r| r.refreshable)
            .map(|r| r.name.clone())
            .collect();
        names.sort();
        names
    }
}
