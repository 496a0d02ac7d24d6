//! Incremental order import for one marketplace.
//!
//! For each active integration: decrypt, build the adapter, poll from the
//! stored cursor, insert every order that is not stored yet, then move the
//! cursor. The cursor moves only after the whole batch was attempted and
//! every insert succeeded, so a failed run is replayed into the idempotent
//! insert on the next tick. Orders the adapter could not decode are logged
//! and skipped; they do not hold the cursor back.

use crate::context::{cancellable, SyncContext};
use crate::error::{SyncError, SyncResult};
use crate::worker::Task;
use async_trait::async_trait;
use chrono::Utc;
use marketsync_core::{InsertOutcome, NewOrder, OrderStatus, TenantIntegration};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of polling one integration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrationPoll {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub failed_inserts: usize,
    /// Orders the adapter could not decode
    pub rejected: usize,
    /// Cursor written back, if it moved
    pub new_cursor: Option<String>,
}

/// Totals over one run across all integrations of the provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub integrations: usize,
    pub failed_integrations: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

pub struct OrderPoller {
    provider: String,
    ctx: SyncContext,
    interval: Duration,
    task_name: String,
}

impl OrderPoller {
    pub fn new(provider: impl Into<String>, ctx: SyncContext, interval: Duration) -> Self {
        let provider = provider.into();
        let task_name = format!("order_poller:{}", provider);
        Self { provider, ctx, interval, task_name }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Poll every active integration of the provider once
    pub async fn poll_all(&self, cancel: &CancellationToken) -> SyncResult<PollSummary> {
        let integrations =
            cancellable(cancel, self.ctx.admin.list_active_integrations(&self.provider)).await?;

        let mut summary = PollSummary { integrations: integrations.len(), ..Default::default() };
        for integration in &integrations {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            match self.poll_integration(integration, cancel).await {
                Ok(poll) => {
                    summary.inserted += poll.inserted;
                    summary.duplicates += poll.duplicates;
                    summary.rejected += poll.rejected;
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(err) => {
                    summary.failed_integrations += 1;
                    warn!(
                        provider = %self.provider,
                        tenant_id = %integration.tenant_id,
                        integration_id = %integration.integration_id,
                        configuration = err.is_configuration(),
                        error = %err,
                        "order poll failed, skipping integration"
                    );
                }
            }
        }

        info!(
            provider = %self.provider,
            integrations = summary.integrations,
            failed = summary.failed_integrations,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            rejected = summary.rejected,
            "order poll finished"
        );
        Ok(summary)
    }

    pub async fn poll_integration(
        &self,
        integration: &TenantIntegration,
        cancel: &CancellationToken,
    ) -> SyncResult<IntegrationPoll> {
        let credentials = self.ctx.decrypt_credentials(&integration.encrypted_credentials)?;
        let marketplace =
            self.ctx
                .registry
                .build_marketplace(&self.provider, &credentials, &integration.settings)?;

        let cursor = integration.cursor();
        let batch = cancellable(cancel, marketplace.poll_orders(cursor)).await?;

        let mut poll = IntegrationPoll {
            fetched: batch.orders.len(),
            rejected: batch.rejected.len(),
            ..Default::default()
        };
        for rejected in &batch.rejected {
            warn!(
                provider = %self.provider,
                tenant_id = %integration.tenant_id,
                integration_id = %integration.integration_id,
                external_id = %rejected.external_id,
                error = %rejected.error,
                "order could not be decoded, skipping"
            );
        }
        for order in &batch.orders {
            let status = marketplace.map_status(&order.external_status).unwrap_or_else(|| {
                debug!(
                    provider = %self.provider,
                    external_id = %order.external_id,
                    external_status = %order.external_status,
                    "unmapped order status, storing as pending"
                );
                OrderStatus::Pending
            });
            let extras = self.ctx.registry.order_extras(&self.provider, order);
            let new_order = NewOrder::from_normalized(integration, order, status, extras);

            match cancellable(cancel, self.ctx.tenants.insert_order_if_absent(&new_order)).await {
                Ok(InsertOutcome::Inserted) => poll.inserted += 1,
                Ok(InsertOutcome::AlreadyExists) => poll.duplicates += 1,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(err) => {
                    poll.failed_inserts += 1;
                    warn!(
                        provider = %self.provider,
                        tenant_id = %integration.tenant_id,
                        external_id = %order.external_id,
                        error = %err,
                        "order insert failed"
                    );
                }
            }
        }

        match batch.next_cursor {
            Some(next) if next != cursor && poll.failed_inserts == 0 => {
                cancellable(
                    cancel,
                    self.ctx.admin.update_sync_cursor(integration.integration_id, &next, Utc::now()),
                )
                .await?;
                poll.new_cursor = Some(next);
            }
            Some(next) if next != cursor => {
                warn!(
                    integration_id = %integration.integration_id,
                    failed = poll.failed_inserts,
                    "keeping cursor until every order is stored"
                );
            }
            _ => {}
        }

        debug!(
            provider = %self.provider,
            integration_id = %integration.integration_id,
            fetched = poll.fetched,
            inserted = poll.inserted,
            duplicates = poll.duplicates,
            rejected = poll.rejected,
            "integration polled"
        );
        Ok(poll)
    }
}

#[async_trait]
impl Task for OrderPoller {
    fn name(&self) -> &str {
        &self.task_name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, cancel: CancellationToken) -> SyncResult<()> {
        self.poll_all(&cancel).await.map(|_| ())
    }
}
