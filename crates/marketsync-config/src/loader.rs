use crate::env_resolver::EnvResolver;
use crate::error::{ConfigError, ConfigResult};
use crate::schema::MarketSyncConfig;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;

/// Supported file formats for configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Yaml,
    Json,
}

impl FileFormat {
    /// Detect file format from extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Ok(FileFormat::Yaml),
            Some("json") => Ok(FileFormat::Json),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => Err(ConfigError::UnsupportedFormat("no extension".to_string())),
        }
    }
}

/// Reads a config file, substitutes `${VAR}` placeholders and validates the result
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    resolver: EnvResolver,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(resolver: EnvResolver) -> Self {
        Self { resolver }
    }

    /// Load configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<MarketSyncConfig> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)?;
        let content = fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), ?format, "loading configuration");

        self.parse_content(&content, format)
    }

    /// Parse configuration content directly
    pub fn parse_content(
        &self,
        content: &str,
        format: FileFormat,
    ) -> ConfigResult<MarketSyncConfig> {
        let raw: JsonValue = match format {
            FileFormat::Yaml => serde_yaml::from_str(content)?,
            FileFormat::Json => serde_json::from_str(content)?,
        };
        // An empty YAML document is a valid all-defaults config
        let raw = match raw {
            JsonValue::Null => JsonValue::Object(Default::default()),
            JsonValue::Object(_) => raw,
            _ => {
                return Err(ConfigError::Validation(
                    "configuration root must be a mapping".to_string(),
                ))
            }
        };

        self.resolver.validate_all_vars(&raw)?;
        let resolved = self.resolver.resolve(&raw)?;
        let config: MarketSyncConfig = serde_json::from_value(resolved)?;
        config.validate()?;
        Ok(config)
    }
}
