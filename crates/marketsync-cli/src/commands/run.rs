//! Long-running worker mode

use crate::commands::refresh_tokens::refresher;
use crate::error::CliResult;
use crate::runtime::Runtime;
use crate::utils::ColoredOutput;
use chrono::Duration as ChronoDuration;
use marketsync_sync::{LeaseConfig, OrderPoller, TrackingPoller, WorkerManager};
use std::sync::Arc;
use tracing::{info, warn};

pub struct RunCommand;

impl RunCommand {
    pub async fn run(runtime: Runtime) -> CliResult<()> {
        let mut manager = build_manager(&runtime);
        if manager.task_names().is_empty() {
            warn!("no workers configured, exiting");
            return Ok(());
        }

        manager.start();
        println!(
            "{} {}",
            ColoredOutput::success("✓ Workers running:"),
            ColoredOutput::highlight(&manager.task_names().join(", "))
        );

        tokio::signal::ctrl_c().await?;
        info!("shutdown requested");
        manager.shutdown().await;
        runtime.store.pool().close().await;
        Ok(())
    }
}

fn build_manager(runtime: &Runtime) -> WorkerManager {
    let workers = &runtime.config.workers;
    let mut manager = WorkerManager::new();

    if workers.leases_enabled() {
        let holder = lease_holder();
        info!(%holder, ttl_secs = workers.lease_ttl_secs, "task leases enabled");
        manager = manager.with_lease(LeaseConfig {
            store: Arc::new(runtime.store.leases()),
            holder,
            ttl: ChronoDuration::seconds(workers.lease_ttl_secs as i64),
        });
    }

    for provider in runtime.marketplaces() {
        manager.register(Arc::new(OrderPoller::new(
            provider,
            runtime.ctx.clone(),
            workers.order_poll_interval(),
        )));
    }

    let refresh_providers = runtime.refresh_providers();
    if !refresh_providers.is_empty() {
        manager.register(Arc::new(refresher(runtime, refresh_providers)));
    }

    if runtime.config.providers.tracking {
        manager.register(Arc::new(TrackingPoller::new(
            runtime.ctx.clone(),
            workers.tracking_poll_interval(),
        )));
    }
    manager
}

/// Unique per process so a restarted instance does not inherit a stale lease
fn lease_holder() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "marketsync".to_string());
    format!("{}-{}-{}", host, std::process::id(), uuid::Uuid::new_v4().simple())
}
