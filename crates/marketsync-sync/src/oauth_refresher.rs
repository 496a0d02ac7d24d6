//! Keeps OAuth access tokens of refreshable marketplaces fresh.

use crate::context::{cancellable, SyncContext};
use crate::error::{SyncError, SyncResult};
use crate::worker::Task;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use marketsync_core::TenantIntegration;
use marketsync_registry::{ProviderError, RefreshedTokens};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tokens expiring later than this are left alone
pub const DEFAULT_REFRESH_THRESHOLD_SECS: i64 = 2 * 60 * 60;

/// Credential field holding the RFC 3339 access token expiry
pub const TOKEN_EXPIRY_FIELD: &str = "token_expiry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Token valid beyond the threshold, no network call made
    Fresh,
    Refreshed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub checked: usize,
    pub refreshed: usize,
    pub failed: usize,
}

pub struct OAuthRefresher {
    providers: Vec<String>,
    ctx: SyncContext,
    interval: Duration,
    threshold: ChronoDuration,
}

impl OAuthRefresher {
    pub fn new(providers: Vec<String>, ctx: SyncContext, interval: Duration) -> Self {
        Self {
            providers,
            ctx,
            interval,
            threshold: ChronoDuration::seconds(DEFAULT_REFRESH_THRESHOLD_SECS),
        }
    }

    /// Refresh every refreshable marketplace known to the registry
    pub fn for_registry(ctx: SyncContext, interval: Duration) -> Self {
        let providers = ctx.registry.refreshable_marketplaces();
        Self::new(providers, ctx, interval)
    }

    pub fn with_threshold(mut self, threshold: ChronoDuration) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    pub async fn refresh_all(&self, cancel: &CancellationToken) -> SyncResult<RefreshSummary> {
        let mut summary = RefreshSummary::default();

        for provider in &self.providers {
            let integrations =
                cancellable(cancel, self.ctx.admin.list_active_integrations(provider)).await?;
            for integration in &integrations {
                summary.checked += 1;
                match self.refresh_integration(integration, cancel).await {
                    Ok(RefreshOutcome::Refreshed) => summary.refreshed += 1,
                    Ok(RefreshOutcome::Fresh) => {}
                    Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                    Err(err) => {
                        summary.failed += 1;
                        warn!(
                            provider = %provider,
                            tenant_id = %integration.tenant_id,
                            integration_id = %integration.integration_id,
                            error = %err,
                            "token refresh failed, retrying next run"
                        );
                    }
                }
            }
        }

        info!(
            checked = summary.checked,
            refreshed = summary.refreshed,
            failed = summary.failed,
            "oauth refresh finished"
        );
        Ok(summary)
    }

    pub async fn refresh_integration(
        &self,
        integration: &TenantIntegration,
        cancel: &CancellationToken,
    ) -> SyncResult<RefreshOutcome> {
        let credentials = self.ctx.decrypt_credentials(&integration.encrypted_credentials)?;

        if let Some(expiry) = token_expiry(&credentials) {
            if expiry - Utc::now() > self.threshold {
                debug!(integration_id = %integration.integration_id, %expiry, "token still fresh");
                return Ok(RefreshOutcome::Fresh);
            }
        }

        let provider = &integration.provider_name;
        let marketplace =
            self.ctx.registry.build_marketplace(provider, &credentials, &integration.settings)?;
        let refresher = marketplace
            .token_refresher()
            .ok_or_else(|| ProviderError::not_supported(provider, "refresh_tokens"))?;
        let tokens = cancellable(cancel, refresher.refresh_tokens()).await?;

        let updated = apply_refreshed_tokens(credentials, &tokens)?;
        let blob = self.ctx.vault.encrypt_json(&updated)?;
        cancellable(cancel, self.ctx.admin.update_credentials(integration.integration_id, &blob))
            .await?;

        info!(
            provider = %provider,
            integration_id = %integration.integration_id,
            expires_at = %tokens.expires_at,
            "access token refreshed"
        );
        Ok(RefreshOutcome::Refreshed)
    }
}

/// Stored expiry, `None` when missing or unparsable (treated as expired)
pub fn token_expiry(credentials: &JsonValue) -> Option<DateTime<Utc>> {
    let raw = credentials.get(TOKEN_EXPIRY_FIELD)?.as_str()?;
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}

/// New credential blob with fresh tokens; other fields are kept as they were
pub fn apply_refreshed_tokens(
    mut credentials: JsonValue,
    tokens: &RefreshedTokens,
) -> SyncResult<JsonValue> {
    let fields = credentials
        .as_object_mut()
        .ok_or_else(|| SyncError::Credentials("credentials are not a JSON object".to_string()))?;
    fields.insert("access_token".to_string(), json!(tokens.access_token));
    if let Some(refresh_token) = &tokens.refresh_token {
        fields.insert("refresh_token".to_string(), json!(refresh_token));
    }
    fields.insert(TOKEN_EXPIRY_FIELD.to_string(), json!(tokens.expires_at.to_rfc3339()));
    Ok(credentials)
}

#[async_trait]
impl Task for OAuthRefresher {
    fn name(&self) -> &str {
        "oauth_refresher"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, cancel: CancellationToken) -> SyncResult<()> {
        self.refresh_all(&cancel).await.map(|_| ())
    }
}
