use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Active,
    Inactive,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Active => "active",
            IntegrationStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(IntegrationStatus::Active),
            "inactive" => Ok(IntegrationStatus::Inactive),
            other => Err(CoreError::Invalid(format!("unknown integration status '{}'", other))),
        }
    }
}

/// A tenant's configured connection to one external provider.
///
/// `encrypted_credentials` is the vault blob exactly as stored; it is only
/// ever decrypted inside a sync task and never logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantIntegration {
    pub integration_id: Uuid,
    pub tenant_id: Uuid,
    pub provider_name: String,
    pub status: IntegrationStatus,
    pub encrypted_credentials: String,
    pub settings: JsonValue,
    pub sync_cursor: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl TenantIntegration {
    /// Stored cursor, or the empty string for an integration that never synced
    pub fn cursor(&self) -> &str {
        self.sync_cursor.as_deref().unwrap_or("")
    }

    pub fn is_active(&self) -> bool {
        self.status == IntegrationStatus::Active
    }
}
