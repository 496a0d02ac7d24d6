use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root of the `marketsync.yaml` / `marketsync.json` file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarketSyncConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: None, max_connections: default_max_connections() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// 32-byte AES key as 64 hex characters
    #[serde(default)]
    pub key_hex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    #[serde(default = "default_order_poll_interval")]
    pub order_poll_interval_secs: u64,
    #[serde(default = "default_oauth_refresh_interval")]
    pub oauth_refresh_interval_secs: u64,
    #[serde(default = "default_tracking_poll_interval")]
    pub tracking_poll_interval_secs: u64,
    /// Tokens expiring later than this are not refreshed
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,
    /// 0 disables the lease table
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            order_poll_interval_secs: default_order_poll_interval(),
            oauth_refresh_interval_secs: default_oauth_refresh_interval(),
            tracking_poll_interval_secs: default_tracking_poll_interval(),
            refresh_threshold_secs: default_refresh_threshold(),
            lease_ttl_secs: default_lease_ttl(),
        }
    }
}

impl WorkersConfig {
    pub fn order_poll_interval(&self) -> Duration {
        Duration::from_secs(self.order_poll_interval_secs)
    }

    pub fn oauth_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.oauth_refresh_interval_secs)
    }

    pub fn tracking_poll_interval(&self) -> Duration {
        Duration::from_secs(self.tracking_poll_interval_secs)
    }

    pub fn leases_enabled(&self) -> bool {
        self.lease_ttl_secs > 0
    }
}

/// Which marketplaces get an order poller and which get token refresh.
/// Empty lists mean every registered provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub marketplaces: Vec<String>,
    #[serde(default)]
    pub oauth_refresh: Vec<String>,
    #[serde(default = "default_true")]
    pub tracking: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

fn default_max_connections() -> u32 {
    10
}
fn default_order_poll_interval() -> u64 {
    300
}
fn default_oauth_refresh_interval() -> u64 {
    1800
}
fn default_tracking_poll_interval() -> u64 {
    900
}
fn default_refresh_threshold() -> u64 {
    7200
}
fn default_lease_ttl() -> u64 {
    600
}
fn default_true() -> bool {
    true
}
fn default_http_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl MarketSyncConfig {
    /// Structural checks that do not need the provider registry
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(key) = &self.vault.key_hex {
            validate_key_hex(key)?;
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation("database.max_connections must be > 0".into()));
        }

        let intervals = [
            ("workers.order_poll_interval_secs", self.workers.order_poll_interval_secs),
            ("workers.oauth_refresh_interval_secs", self.workers.oauth_refresh_interval_secs),
            ("workers.tracking_poll_interval_secs", self.workers.tracking_poll_interval_secs),
            ("http.timeout_secs", self.http.timeout_secs),
            ("http.connect_timeout_secs", self.http.connect_timeout_secs),
        ];
        if let Some((field, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Validation(format!("{} must be > 0", field)));
        }
        Ok(())
    }

    /// Reject provider names the running registry does not know
    pub fn validate_providers(&self, known_marketplaces: &[String]) -> ConfigResult<()> {
        let listed = self.providers.marketplaces.iter().chain(&self.providers.oauth_refresh);
        for name in listed {
            if !known_marketplaces.iter().any(|known| known == name) {
                return Err(ConfigError::Validation(format!(
                    "unknown marketplace '{}' (known: {})",
                    name,
                    known_marketplaces.join(", ")
                )));
            }
        }
        Ok(())
    }

    pub fn database_url(&self) -> ConfigResult<&str> {
        self.database
            .url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField("database.url".to_string()))
    }

    pub fn key_hex(&self) -> ConfigResult<&str> {
        self.vault
            .key_hex
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField("vault.key_hex".to_string()))
    }
}

/// The vault key must decode to exactly 32 bytes
pub fn validate_key_hex(key: &str) -> ConfigResult<()> {
    let bytes = hex::decode(key.trim())
        .map_err(|e| ConfigError::Validation(format!("vault.key_hex is not hex: {}", e)))?;
    if bytes.len() != 32 {
        return Err(ConfigError::Validation(format!(
            "vault.key_hex must be 64 hex characters (32 bytes), got {} bytes",
            bytes.len()
        )));
    }
    Ok(())
}
