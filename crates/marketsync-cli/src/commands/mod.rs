pub mod migrate;
pub mod poll_once;
pub mod providers;
pub mod refresh_tokens;
pub mod run;
pub mod track_once;
pub mod vault;

// Re-export command handlers
pub use migrate::MigrateCommand;
pub use poll_once::PollOnceCommand;
pub use providers::ProvidersCommand;
pub use refresh_tokens::RefreshTokensCommand;
pub use run::RunCommand;
pub use track_once::TrackOnceCommand;
pub use vault::VaultCommand;
