//! Shipment status updates from carrier tracking.
//!
//! Open shipments are grouped by carrier and credential blob so each group
//! decrypts once and builds one adapter. Only the most recent event counts;
//! a status is written only when it maps to something new.

use crate::context::{cancellable, SyncContext};
use crate::error::{SyncError, SyncResult};
use crate::worker::Task;
use async_trait::async_trait;
use marketsync_core::TrackableShipment;
use marketsync_registry::CarrierProvider;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingSummary {
    pub shipments: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Shipments without credentials or in a group that failed to build
    pub skipped: usize,
    pub failed: usize,
}

type GroupKey = (String, String);

pub struct TrackingPoller {
    ctx: SyncContext,
    interval: Duration,
}

impl TrackingPoller {
    pub fn new(ctx: SyncContext, interval: Duration) -> Self {
        Self { ctx, interval }
    }

    pub async fn poll_all(&self, cancel: &CancellationToken) -> SyncResult<TrackingSummary> {
        let shipments = cancellable(cancel, self.ctx.admin.list_trackable_shipments()).await?;
        let mut summary = TrackingSummary { shipments: shipments.len(), ..Default::default() };

        let mut groups: BTreeMap<GroupKey, Vec<TrackableShipment>> = BTreeMap::new();
        for shipment in shipments {
            match shipment.integration_credentials.clone() {
                Some(blob) => {
                    groups.entry((shipment.provider.clone(), blob)).or_default().push(shipment)
                }
                None => {
                    summary.skipped += 1;
                    warn!(
                        shipment_id = %shipment.id,
                        tenant_id = %shipment.tenant_id,
                        provider = %shipment.provider,
                        "shipment has no integration credentials, skipping"
                    );
                }
            }
        }

        for ((provider, blob), shipments) in &groups {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let carrier = match self.build_carrier(provider, blob, &shipments[0]) {
                Ok(carrier) => carrier,
                Err(err) => {
                    summary.skipped += shipments.len();
                    warn!(
                        provider = %provider,
                        shipments = shipments.len(),
                        error = %err,
                        "cannot build carrier, skipping group"
                    );
                    continue;
                }
            };

            for shipment in shipments {
                match self.track_shipment(carrier.as_ref(), shipment, cancel).await {
                    Ok(true) => summary.updated += 1,
                    Ok(false) => summary.unchanged += 1,
                    Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                    Err(err) => {
                        summary.failed += 1;
                        warn!(
                            provider = %provider,
                            shipment_id = %shipment.id,
                            tracking_number = %shipment.tracking_number,
                            error = %err,
                            "tracking fetch failed"
                        );
                    }
                }
            }
        }

        info!(
            shipments = summary.shipments,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            "tracking poll finished"
        );
        Ok(summary)
    }

    fn build_carrier(
        &self,
        provider: &str,
        blob: &str,
        sample: &TrackableShipment,
    ) -> SyncResult<Box<dyn CarrierProvider>> {
        let credentials = self.ctx.decrypt_credentials(blob)?;
        Ok(self.ctx.registry.build_carrier(provider, &credentials, &sample.integration_settings)?)
    }

    /// Returns whether a new status was written
    pub async fn track_shipment(
        &self,
        carrier: &dyn CarrierProvider,
        shipment: &TrackableShipment,
        cancel: &CancellationToken,
    ) -> SyncResult<bool> {
        let events = cancellable(cancel, carrier.get_tracking(&shipment.tracking_number)).await?;
        let Some(latest) = events.last() else {
            return Ok(false);
        };

        let status = match carrier.map_status(&latest.status) {
            Some(status) => status,
            None => {
                debug!(
                    shipment_id = %shipment.id,
                    native_status = %latest.status,
                    "unmapped carrier status"
                );
                return Ok(false);
            }
        };
        if status == shipment.status {
            return Ok(false);
        }

        cancellable(
            cancel,
            self.ctx.tenants.update_shipment_status(shipment.tenant_id, shipment.id, status),
        )
        .await?;
        info!(
            shipment_id = %shipment.id,
            tenant_id = %shipment.tenant_id,
            from = %shipment.status,
            to = %status,
            "shipment status updated"
        );
        Ok(true)
    }
}

#[async_trait]
impl Task for TrackingPoller {
    fn name(&self) -> &str {
        "tracking_poller"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, cancel: CancellationToken) -> SyncResult<()> {
        self.poll_all(&cancel).await.map(|_| ())
    }
}
