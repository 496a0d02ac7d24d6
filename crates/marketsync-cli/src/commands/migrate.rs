//! Database migration command

use crate::{error::CliResult, utils::ColoredOutput};
use marketsync_config::MarketSyncConfig;
use marketsync_store::SqlStore;
use tracing::info;

pub struct MigrateCommand;

impl MigrateCommand {
    pub async fn run(config: &MarketSyncConfig) -> CliResult<()> {
        let url = config.database_url()?;
        info!("Applying migrations");

        // Connecting applies pending migrations
        let store = SqlStore::new_with_config(url, Some(config.database.max_connections)).await?;
        store.pool().close().await;

        println!("{}", ColoredOutput::success("✓ Database schema is up to date"));
        Ok(())
    }
}
