//! Assembles configuration, the provider registry, the vault and the Postgres
//! stores into the context the sync tasks run against.

use crate::cli::Cli;
use crate::error::{CliError, CliResult};
use marketsync_config::{validate_key_hex, ConfigLoader, MarketSyncConfig};
use marketsync_providers::{build_http_client, build_registry, HttpSettings};
use marketsync_registry::ProviderRegistry;
use marketsync_store::{CredentialVault, SqlStore};
use marketsync_sync::SyncContext;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Config file (if any) with the command-line overrides applied
pub fn load_config(cli: &Cli) -> CliResult<MarketSyncConfig> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::new().load_from_file(path)?,
        None => MarketSyncConfig::default(),
    };

    if let Some(url) = &cli.database_url {
        config.database.url = Some(url.clone());
    }
    if let Some(key) = &cli.encryption_key {
        validate_key_hex(key)?;
        config.vault.key_hex = Some(key.clone());
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    Ok(config)
}

pub fn registry(config: &MarketSyncConfig) -> CliResult<ProviderRegistry> {
    let http = build_http_client(&HttpSettings {
        timeout: Duration::from_secs(config.http.timeout_secs),
        connect_timeout: Duration::from_secs(config.http.connect_timeout_secs),
    })?;
    let registry = build_registry(&http)?;
    config.validate_providers(&registry.marketplace_names())?;
    Ok(registry)
}

pub fn vault(config: &MarketSyncConfig) -> CliResult<CredentialVault> {
    Ok(CredentialVault::from_hex(config.key_hex()?)?)
}

/// Everything a worker-running command needs
pub struct Runtime {
    pub config: MarketSyncConfig,
    pub store: SqlStore,
    pub ctx: SyncContext,
}

impl Runtime {
    pub async fn connect(config: MarketSyncConfig) -> CliResult<Self> {
        let vault = vault(&config)?;
        let registry = registry(&config)?;

        let store = SqlStore::new_with_config(
            config.database_url()?,
            Some(config.database.max_connections),
        )
        .await?;
        info!(
            marketplaces = registry.marketplace_names().len(),
            carriers = registry.carrier_names().len(),
            "connected to database"
        );

        let ctx = SyncContext::new(
            Arc::new(registry),
            vault,
            Arc::new(store.admin()),
            Arc::new(store.tenant()),
        );
        Ok(Self { config, store, ctx })
    }

    /// Marketplaces that get an order poller
    pub fn marketplaces(&self) -> Vec<String> {
        selected(&self.config.providers.marketplaces, self.ctx.registry.marketplace_names())
    }

    /// Marketplaces whose tokens are refreshed
    pub fn refresh_providers(&self) -> Vec<String> {
        selected(
            &self.config.providers.oauth_refresh,
            self.ctx.registry.refreshable_marketplaces(),
        )
    }

    pub fn require_marketplace(&self, name: &str) -> CliResult<()> {
        if self.ctx.registry.has_marketplace(name) {
            Ok(())
        } else {
            Err(CliError::UnknownProvider(name.to_string()))
        }
    }
}

/// An empty configured list means all of `available`
fn selected(configured: &[String], available: Vec<String>) -> Vec<String> {
    if configured.is_empty() {
        available
    } else {
        configured.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use tempfile::TempDir;

    const KEY: &str = "8f3b1c2d4e5f60718293a4b5c6d7e8f90112233445566778899aabbccddeeff0";

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marketsync.yaml");
        fs::write(
            &path,
            "database:\n  url: postgres://from-file/db\nworkers:\n  lease_ttl_secs: 30\n",
        )
        .unwrap();
        let path_str = path.to_str().unwrap();

        let cli = Cli::try_parse_from([
            "marketsync",
            "--config",
            path_str,
            "--database-url",
            "postgres://from-flag/db",
            "--encryption-key",
            KEY,
            "migrate",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();

        assert_eq!(config.database_url().unwrap(), "postgres://from-flag/db");
        assert_eq!(config.key_hex().unwrap(), KEY);
        assert_eq!(config.workers.lease_ttl_secs, 30);
    }

    #[test]
    fn test_bad_key_flag_rejected() {
        let cli =
            Cli::try_parse_from(["marketsync", "--encryption-key", "beef", "track-once"]).unwrap();
        assert!(matches!(load_config(&cli), Err(CliError::Config(_))));
    }

    #[test]
    fn test_registry_rejects_unknown_configured_marketplace() {
        let mut config = MarketSyncConfig::default();
        config.providers.marketplaces = vec!["allegro".to_string(), "nosuchmarket".to_string()];
        assert!(matches!(registry(&config), Err(CliError::Config(_))));

        config.providers.marketplaces.pop();
        assert!(registry(&config).is_ok());
    }

    #[test]
    fn test_selection_defaults_to_everything() {
        let all = vec!["allegro".to_string(), "ebay".to_string()];
        assert_eq!(selected(&[], all.clone()), all);
        assert_eq!(selected(&["ebay".to_string()], all), vec!["ebay".to_string()]);
    }
}
