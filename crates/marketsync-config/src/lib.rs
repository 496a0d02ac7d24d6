//! Configuration for the MarketSync service.
//!
//! A single YAML or JSON file describes the database, the credential vault key,
//! worker intervals and which marketplaces are synchronized. String values may
//! reference environment variables as `${VAR}` or `${VAR:default}`.

pub mod env_resolver;
pub mod error;
pub mod loader;
pub mod schema;

pub use env_resolver::{EnvResolver, EnvResolverError};
pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, FileFormat};
pub use schema::{
    validate_key_hex, DatabaseConfig, HttpConfig, LoggingConfig, MarketSyncConfig,
    ProvidersConfig, VaultConfig, WorkersConfig,
};
