use crate::error::CliResult;
use crate::runtime::Runtime;
use crate::utils::{cancel_on_ctrl_c, format_duration, print_count, ColoredOutput};
use marketsync_sync::OrderPoller;
use std::time::Instant;

pub struct PollOnceCommand;

impl PollOnceCommand {
    pub async fn run(runtime: &Runtime, provider: &str) -> CliResult<()> {
        runtime.require_marketplace(provider)?;
        let poller = OrderPoller::new(
            provider,
            runtime.ctx.clone(),
            runtime.config.workers.order_poll_interval(),
        );

        let started = Instant::now();
        let summary = poller.poll_all(&cancel_on_ctrl_c()).await?;

        println!(
            "{} {} in {}",
            ColoredOutput::success("✓ Polled"),
            ColoredOutput::highlight(provider),
            format_duration(started.elapsed())
        );
        print_count("integrations", summary.integrations);
        print_count("failed integrations", summary.failed_integrations);
        print_count("orders inserted", summary.inserted);
        print_count("already stored", summary.duplicates);
        Ok(())
    }
}
