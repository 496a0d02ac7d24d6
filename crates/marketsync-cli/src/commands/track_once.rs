use crate::error::CliResult;
use crate::runtime::Runtime;
use crate::utils::{cancel_on_ctrl_c, format_duration, print_count, ColoredOutput};
use marketsync_sync::TrackingPoller;
use std::time::Instant;

pub struct TrackOnceCommand;

impl TrackOnceCommand {
    pub async fn run(runtime: &Runtime) -> CliResult<()> {
        let interval = runtime.config.workers.tracking_poll_interval();
        let poller = TrackingPoller::new(runtime.ctx.clone(), interval);

        let started = Instant::now();
        let summary = poller.poll_all(&cancel_on_ctrl_c()).await?;

        println!(
            "{} in {}",
            ColoredOutput::success("✓ Tracking poll finished"),
            format_duration(started.elapsed())
        );
        print_count("open shipments", summary.shipments);
        print_count("status updated", summary.updated);
        print_count("unchanged", summary.unchanged);
        print_count("skipped", summary.skipped);
        print_count("failed", summary.failed);
        Ok(())
    }
}
