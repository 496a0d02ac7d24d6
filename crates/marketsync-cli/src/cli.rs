//! CLI argument definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "marketsync",
    about = "MarketSync - marketplace order and carrier tracking synchronization",
    version,
    author = "MarketSync Team"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// YAML or JSON configuration file
    #[arg(long, short = 'c', global = true, env = "MARKETSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Postgres connection string, overrides database.url
    #[arg(long, global = true, env = "MARKETSYNC_DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Credential vault key as 64 hex characters, overrides vault.key_hex
    #[arg(long, global = true, env = "MARKETSYNC_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every sync worker until interrupted
    Run,

    /// Create or upgrade the database schema
    Migrate,

    /// Poll one marketplace for new orders across all its integrations
    PollOnce {
        /// Marketplace name, e.g. allegro
        provider: String,
    },

    /// Refresh OAuth tokens that are close to expiry
    RefreshTokens {
        /// Limit the run to one marketplace
        #[arg(long)]
        provider: Option<String>,
    },

    /// Poll carriers once for every open shipment
    TrackOnce,

    /// List the registered marketplaces and carriers
    Providers {
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Encrypt or decrypt integration credentials
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },
}

#[derive(Subcommand)]
pub enum VaultAction {
    /// Encrypt a JSON credentials object, read from --input or stdin
    Encrypt {
        #[arg(long)]
        input: Option<String>,
    },
    /// Decrypt a credentials blob. Secret fields are redacted unless --reveal is given.
    Decrypt {
        blob: String,
        #[arg(long)]
        reveal: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}
