//! Offline credential sealing for seeding `tenant_integrations`

use crate::cli::VaultAction;
use crate::error::{CliError, CliResult};
use crate::runtime;
use anyhow::Context;
use marketsync_config::MarketSyncConfig;
use marketsync_core::sanitize_json_value;
use marketsync_store::CredentialVault;
use serde_json::Value as JsonValue;
use std::io::Read;

pub struct VaultCommand;

impl VaultCommand {
    pub fn run(config: &MarketSyncConfig, action: VaultAction) -> CliResult<()> {
        let vault = runtime::vault(config)?;
        match action {
            VaultAction::Encrypt { input } => {
                let raw = match input {
                    Some(raw) => raw,
                    None => read_stdin()?,
                };
                println!("{}", encrypt(&vault, &raw)?);
            }
            VaultAction::Decrypt { blob, reveal } => {
                let credentials = decrypt(&vault, blob.trim(), reveal)?;
                println!("{}", serde_json::to_string_pretty(&credentials)?);
            }
        }
        Ok(())
    }
}

fn read_stdin() -> CliResult<String> {
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read credentials from stdin")?;
    Ok(buffer)
}

pub fn encrypt(vault: &CredentialVault, raw: &str) -> CliResult<String> {
    let credentials: JsonValue = serde_json::from_str(raw.trim())
        .map_err(|e| CliError::InvalidArgument(format!("Invalid credentials JSON: {}", e)))?;
    Ok(vault.encrypt_json(&credentials)?)
}

pub fn decrypt(vault: &CredentialVault, blob: &str, reveal: bool) -> CliResult<JsonValue> {
    let credentials = vault.decrypt_json(blob)?;
    Ok(if reveal { credentials } else { sanitize_json_value(&credentials) })
}
