//! `${VAR}` / `${VAR:default}` placeholder resolution restricted to whitelisted prefixes

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::env;
use thiserror::Error;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}").expect("placeholder pattern")
});

pub const DEFAULT_PREFIXES: &[&str] = &["MARKETSYNC_", "DATABASE_", "DB_", "LOG_"];

#[derive(Debug, Error)]
pub enum EnvResolverError {
    #[error("Environment variable '{0}' not found and no default provided")]
    VarNotFound(String),
    #[error("Environment variable '{0}' is not in whitelist. Allowed prefixes: {1:?}")]
    VarNotWhitelisted(String, Vec<String>),
}

#[derive(Debug, Clone)]
pub struct EnvResolver {
    /// Empty means every variable is allowed
    allowed_prefixes: Vec<String>,
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIXES.iter().map(|p| p.to_string()).collect())
    }
}

impl EnvResolver {
    pub fn new(allowed_prefixes: Vec<String>) -> Self {
        Self { allowed_prefixes }
    }

    pub fn unrestricted() -> Self {
        Self { allowed_prefixes: vec![] }
    }

    /// Resolve placeholders in every string of `value`.
    ///
    /// A string that is exactly one placeholder becomes a bool or integer when
    /// the resolved text parses as one, so `"${MARKETSYNC_MAX_CONN:10}"` can
    /// feed a numeric field.
    pub fn resolve(&self, value: &JsonValue) -> Result<JsonValue, EnvResolverError> {
        match value {
            JsonValue::String(s) => self.resolve_string(s),
            JsonValue::Object(obj) => {
                let mut resolved = serde_json::Map::with_capacity(obj.len());
                for (key, val) in obj {
                    resolved.insert(key.clone(), self.resolve(val)?);
                }
                Ok(JsonValue::Object(resolved))
            }
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<_, _>>()
                .map(JsonValue::Array),
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(&self, input: &str) -> Result<JsonValue, EnvResolverError> {
        if !input.contains("${") {
            return Ok(JsonValue::String(input.to_string()));
        }

        let mut output = String::with_capacity(input.len());
        let mut last = 0;
        let mut placeholders = 0;
        for caps in PLACEHOLDER.captures_iter(input) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let name = &caps[1];
            self.check_allowed(name)?;

            let value = match env::var(name) {
                Ok(value) => value,
                Err(_) => match caps.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => return Err(EnvResolverError::VarNotFound(name.to_string())),
                },
            };
            output.push_str(&input[last..whole.start]);
            output.push_str(&value);
            last = whole.end;
            placeholders += 1;
        }
        output.push_str(&input[last..]);

        let whole_input = PLACEHOLDER.find(input).map(|m| m.as_str()) == Some(input);
        if placeholders == 1 && whole_input {
            if let Ok(flag) = output.parse::<bool>() {
                return Ok(JsonValue::Bool(flag));
            }
            if let Ok(number) = output.parse::<i64>() {
                return Ok(JsonValue::from(number));
            }
        }
        Ok(JsonValue::String(output))
    }

    fn check_allowed(&self, name: &str) -> Result<(), EnvResolverError> {
        if self.allowed_prefixes.is_empty()
            || self.allowed_prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
        {
            return Ok(());
        }
        Err(EnvResolverError::VarNotWhitelisted(name.to_string(), self.allowed_prefixes.clone()))
    }

    /// Check every placeholder against the whitelist without reading the environment
    pub fn validate_all_vars(&self, value: &JsonValue) -> Result<(), EnvResolverError> {
        match value {
            JsonValue::String(s) => {
                for caps in PLACEHOLDER.captures_iter(s) {
                    self.check_allowed(&caps[1])?;
                }
                Ok(())
            }
            JsonValue::Object(obj) => obj.values().try_for_each(|v| self.validate_all_vars(v)),
            JsonValue::Array(items) => items.iter().try_for_each(|v| self.validate_all_vars(v)),
            _ => Ok(()),
        }
    }
}
