use crate::cli::OutputFormat;
use crate::error::CliResult;
use crate::runtime;
use crate::utils::ColoredOutput;
use marketsync_config::MarketSyncConfig;
use serde::Serialize;

pub struct ProvidersCommand;

#[derive(Debug, Serialize)]
struct ProviderListing {
    marketplaces: Vec<MarketplaceListing>,
    carriers: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MarketplaceListing {
    name: String,
    oauth_refresh: bool,
}

impl ProvidersCommand {
    pub fn run(config: &MarketSyncConfig, format: OutputFormat) -> CliResult<()> {
        let registry = runtime::registry(config)?;
        let refreshable = registry.refreshable_marketplaces();
        let listing = ProviderListing {
            marketplaces: registry
                .marketplace_names()
                .into_iter()
                .map(|name| MarketplaceListing {
                    oauth_refresh: refreshable.contains(&name),
                    name,
                })
                .collect(),
            carriers: registry.carrier_names(),
        };

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&listing)?),
            OutputFormat::Table => print_table(&listing),
        }
        Ok(())
    }
}

fn print_table(listing: &ProviderListing) {
    println!("{}", ColoredOutput::highlight("Marketplaces"));
    for marketplace in &listing.marketplaces {
        let note = if marketplace.oauth_refresh { "oauth refresh" } else { "" };
        println!("  {:<16}{}", marketplace.name, ColoredOutput::dim(note));
    }
    println!("{}", ColoredOutput::highlight("Carriers"));
    for carrier in &listing.carriers {
        println!("  {}", carrier);
    }
}
