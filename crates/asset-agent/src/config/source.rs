use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AssetError, Result};

const ENV_PREFIX: &str = "ASSET_";

/// Represents the source of a configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Default built-in value
    Default,
    /// From the JSON config file
    File,
    /// From environment variable
    Environment(String),
    /// Programmatically set
    Command,
}

impl ConfigSource {
    pub fn as_str(&self) -> &str {
        match self {
            ConfigSource::Default => "default",
            ConfigSource::File => "file",
            ConfigSource::Environment(var) => var,
            ConfigSource::Command => "command",
        }
    }
}

/// Raw configuration data loaded from a JSON file, keyed by kebab-case name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(flatten)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

/// Loads configuration from the environment and config files
#[derive(Debug)]
pub struct ConfigLoader {
    use_environment: bool,
}

impl ConfigLoader {
    pub fn new(use_environment: bool) -> Self {
        Self { use_environment }
    }

    /// Environment variable name for a kebab-case key, e.g.
    /// `lock-mode` becomes `ASSET_LOCK_MODE`.
    pub fn env_var_name(key: &str) -> String {
        format!("{}{}", ENV_PREFIX, key.to_uppercase().replace('-', "_"))
    }

    /// Get a raw environment variable, ignoring empty values
    pub fn get_env(&self, var: &str) -> Option<String> {
        if !self.use_environment {
            return None;
        }

        env::var(var).ok().filter(|s| !s.is_empty())
    }

    /// Get the environment override for a configuration key
    pub fn get_env_config(&self, key: &str) -> Option<String> {
        self.get_env(&Self::env_var_name(key))
    }

    /// Get the cache directory
    pub fn get_cache_dir(&self) -> PathBuf {
        if let Some(cache) = self.get_env_config("cache-dir") {
            return PathBuf::from(cache);
        }

        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "asset-agent") {
            proj_dirs.cache_dir().to_path_buf()
        } else if let Some(base) = directories::BaseDirs::new() {
            base.home_dir().join(".cache").join("asset-agent")
        } else {
            PathBuf::from(".asset-cache")
        }
    }

    /// Load configuration from a JSON file. A missing file yields an empty
    /// configuration.
    pub fn load_config_file<P: AsRef<Path>>(&self, path: P) -> Result<RawConfig> {
        let path = path.as_ref();

        if !path.exists() {
            log::debug!("Config file {} not found, using defaults", path.display());
            return Ok(RawConfig::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| AssetError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let config: RawConfig = serde_json::from_str(&contents)
            .map_err(|e| AssetError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        Ok(config)
    }
}
