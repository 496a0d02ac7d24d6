use crate::error::CliResult;
use crate::runtime::Runtime;
use crate::utils::{cancel_on_ctrl_c, format_duration, print_count, ColoredOutput};
use chrono::Duration as ChronoDuration;
use marketsync_sync::OAuthRefresher;
use std::time::Instant;

pub struct RefreshTokensCommand;

impl RefreshTokensCommand {
    pub async fn run(runtime: &Runtime, provider: Option<String>) -> CliResult<()> {
        let providers = match provider {
            Some(name) => {
                runtime.require_marketplace(&name)?;
                vec![name]
            }
            None => runtime.refresh_providers(),
        };
        let refresher = refresher(runtime, providers);

        let started = Instant::now();
        let summary = refresher.refresh_all(&cancel_on_ctrl_c()).await?;

        println!(
            "{} {} in {}",
            ColoredOutput::success("✓ Token refresh finished for"),
            ColoredOutput::highlight(&refresher.providers().join(", ")),
            format_duration(started.elapsed())
        );
        print_count("checked", summary.checked);
        print_count("refreshed", summary.refreshed);
        print_count("failed", summary.failed);
        Ok(())
    }
}

pub(crate) fn refresher(runtime: &Runtime, providers: Vec<String>) -> OAuthRefresher {
    let workers = &runtime.config.workers;
    let threshold = ChronoDuration::seconds(workers.refresh_threshold_secs as i64);
    OAuthRefresher::new(providers, runtime.ctx.clone(), workers.oauth_refresh_interval())
        .with_threshold(threshold)
}
