//! List command - show installed assets recorded in the cache index.

use anyhow::{Context, Result};
use asset_agent::store::INDEX_FILENAME;
use asset_agent::{AgentConfig, AssetStore, RuntimeAsset};
use clap::Args;
use console::style;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// First twelve characters of an index key.
fn short_key(key: &str) -> String {
    key.chars().take(12).collect()
}

pub fn execute(args: ListArgs, config: &AgentConfig) -> Result<i32> {
    if !config.cache_dir.join(INDEX_FILENAME).exists() {
        println!(
            "{} No asset cache at {}",
            style("Info:").cyan(),
            config.cache_dir.display()
        );
        return Ok(0);
    }

    let store = AssetStore::open(&config.cache_dir, config.busy_timeout)
        .context("Failed to open asset store")?;
    let records = store.list().context("Failed to read asset store")?;
    store.close()?;

    if args.json {
        let entries: Vec<serde_json::Value> = records
            .iter()
            .map(|(key, value)| {
                let asset = serde_json::from_str::<RuntimeAsset>(value).ok();
                serde_json::json!({ "key": key, "asset": asset })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(0);
    }

    for (key, value) in &records {
        let short = short_key(key);
        match serde_json::from_str::<RuntimeAsset>(value) {
            Ok(asset) => println!(
                "{} {} {}",
                style(asset.name.as_deref().unwrap_or("-")).green(),
                style(short).dim(),
                asset.path.display()
            ),
            Err(_) => println!(
                "{} {} {}",
                style("?").yellow(),
                style(short).dim(),
                style("corrupt record, reinstalled on next use").yellow()
            ),
        }
    }

    if records.is_empty() {
        println!("{} No assets installed", style("Info:").cyan());
    }

    Ok(0)
}
