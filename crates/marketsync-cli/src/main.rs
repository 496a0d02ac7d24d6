//! MarketSync CLI main entry point

use clap::Parser;
use marketsync_cli::{
    cli::{Cli, Commands},
    commands::{
        MigrateCommand, PollOnceCommand, ProvidersCommand, RefreshTokensCommand, RunCommand,
        TrackOnceCommand, VaultCommand,
    },
    error::CliResult,
    runtime::{load_config, Runtime},
    utils::{init_tracing, ColoredOutput},
};
use tracing::info;

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {}", ColoredOutput::error("Error:"), e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = load_config(&cli)?;
    init_tracing(&config.logging.level, config.logging.json)?;

    info!("MarketSync CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run => RunCommand::run(Runtime::connect(config).await?).await,

        Commands::Migrate => MigrateCommand::run(&config).await,

        Commands::PollOnce { provider } => {
            let runtime = Runtime::connect(config).await?;
            PollOnceCommand::run(&runtime, &provider).await
        }

        Commands::RefreshTokens { provider } => {
            let runtime = Runtime::connect(config).await?;
            RefreshTokensCommand::run(&runtime, provider).await
        }

        Commands::TrackOnce => {
            let runtime = Runtime::connect(config).await?;
            TrackOnceCommand::run(&runtime).await
        }

        Commands::Providers { format } => ProvidersCommand::run(&config, format),

        Commands::Vault { action } => VaultCommand::run(&config, action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsync_cli::cli::{OutputFormat, VaultAction};

    #[test]
    fn test_poll_once_parsing() {
        let cli = Cli::try_parse_from([
            "marketsync",
            "--database-url",
            "postgres://localhost/marketsync",
            "poll-once",
            "allegro",
        ])
        .unwrap();

        assert_eq!(cli.database_url.as_deref(), Some("postgres://localhost/marketsync"));
        match cli.command {
            Commands::PollOnce { provider } => assert_eq!(provider, "allegro"),
            _ => panic!("Expected PollOnce command"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["marketsync", "providers", "--format", "json", "--json-logs"])
                .unwrap();

        assert!(cli.json_logs);
        assert!(matches!(cli.command, Commands::Providers { format: OutputFormat::Json }));
    }

    #[test]
    fn test_vault_parsing() {
        let cli = Cli::try_parse_from(["marketsync", "vault", "decrypt", "BLOB==", "--reveal"])
            .unwrap();

        match cli.command {
            Commands::Vault { action: VaultAction::Decrypt { blob, reveal } } => {
                assert_eq!(blob, "BLOB==");
                assert!(reveal);
            }
            _ => panic!("Expected vault decrypt"),
        }
    }

    #[test]
    fn test_refresh_tokens_provider_is_optional() {
        let cli = Cli::try_parse_from(["marketsync", "refresh-tokens"]).unwrap();
        assert!(matches!(cli.command, Commands::RefreshTokens { provider: None }));
    }
}
