//! Global options and input files shared by the subcommands.

use anyhow::{Context, Result};
use asset_agent::{AgentConfig, AssetSpec, LockMode};
use clap::Args;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// JSON configuration file (kebab-case keys)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache directory, overrides ASSET_CACHE_DIR and the config file
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Install lock mode: per-asset or global
    #[arg(long, global = true, value_name = "MODE", value_parser = parse_lock_mode)]
    pub lock_mode: Option<LockMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl GlobalArgs {
    /// Resolve the agent configuration. Command line flags take precedence
    /// over the environment, which takes precedence over the config file.
    pub fn agent_config(&self) -> Result<AgentConfig> {
        let mut config = AgentConfig::build(self.config.as_deref(), true)
            .context("Failed to load configuration")?;

        if let Some(dir) = &self.cache_dir {
            config.set_cache_dir(dir);
        }
        if let Some(mode) = self.lock_mode {
            config = config.with_lock_mode(mode);
        }

        Ok(config)
    }
}

fn parse_lock_mode(s: &str) -> std::result::Result<LockMode, String> {
    LockMode::from_str(s).ok_or_else(|| format!("invalid lock mode '{}' (expected per-asset or global)", s))
}

/// Read a JSON array of asset specs.
pub fn read_specs(path: &Path) -> Result<Vec<AssetSpec>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let specs: Vec<AssetSpec> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse assets from {}", path.display()))?;
    Ok(specs)
}

/// Read the entity JSON document; without a file the entity is empty.
pub fn read_entity(path: Option<&Path>) -> Result<Value> {
    let Some(path) = path else {
        return Ok(Value::Object(Default::default()));
    };
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse entity from {}", path.display()))
}
