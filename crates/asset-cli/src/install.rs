//! Install command - resolve assets for an entity and print their environment.

use anyhow::{Context, Result};
use asset_agent::{get_all, AgentConfig, AssetError, Manager};
use clap::Args;
use console::style;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::config::{read_entity, read_specs};

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// JSON file with an array of asset definitions
    #[arg(long, value_name = "FILE")]
    pub assets: PathBuf,

    /// JSON file describing the entity the assets are filtered against
    #[arg(long, value_name = "FILE")]
    pub entity: Option<PathBuf>,
}

pub async fn execute(args: InstallArgs, config: AgentConfig) -> Result<i32> {
    let specs = read_specs(&args.assets)?;
    let entity = read_entity(args.entity.as_deref())?;

    let shutdown = CancellationToken::new();
    let running = Manager::new(config, entity)
        .start(shutdown.clone())
        .await
        .context("Failed to start asset manager")?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let getter = running.getter();
    let result = get_all(getter.as_ref(), &specs, &cancel).await;
    interrupt.abort();

    shutdown.cancel();
    running.wait().await.context("Failed to close asset store")?;

    let assets = match result {
        Ok(assets) => assets,
        Err(AssetError::Cancelled) => {
            eprintln!("{} Interrupted", style("Error:").red().bold());
            return Ok(130);
        }
        Err(e) => {
            let stage = e.stage();
            return Err(e).with_context(|| format!("Asset installation failed ({} stage)", stage));
        }
    };

    eprintln!(
        "{} {} of {} asset(s) apply",
        style("Success:").green().bold(),
        assets.len(),
        specs.len()
    );
    for asset in &assets {
        log::info!("{}", asset.path.display());
    }

    for var in assets.env() {
        println!("{}", var);
    }

    Ok(0)
}
