use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::source::{ConfigLoader, ConfigSource, RawConfig};
use crate::error::{AssetError, Result};
use crate::http::{HttpClientConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};

/// How installs are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockMode {
    /// One install per content hash at a time; unrelated assets proceed in
    /// parallel.
    PerAsset,
    /// A single exclusive store transaction spans every install, so all
    /// installs queue behind each other.
    Global,
}

impl Default for LockMode {
    fn default() -> Self {
        LockMode::PerAsset
    }
}

impl LockMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "per-asset" | "per_asset" | "asset" => Some(LockMode::PerAsset),
            "global" => Some(LockMode::Global),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::PerAsset => "per-asset",
            LockMode::Global => "global",
        }
    }
}

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(600);

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Root of the content-addressed cache
    pub cache_dir: PathBuf,

    /// Overall timeout of a single fetch request
    pub fetch_timeout: Duration,

    pub connect_timeout: Duration,

    pub max_retries: u32,

    pub lock_mode: LockMode,

    /// How long a writer waits for the store's write lock
    pub busy_timeout: Duration,

    sources: HashMap<String, ConfigSource>,
}

impl AgentConfig {
    /// Defaults rooted at `cache_dir`
    pub fn with_cache_dir<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            fetch_timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            lock_mode: LockMode::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            sources: HashMap::new(),
        }
    }

    /// Build configuration from defaults, an optional JSON file and the
    /// environment, in increasing order of priority.
    pub fn build(config_file: Option<&Path>, use_environment: bool) -> Result<Self> {
        let loader = ConfigLoader::new(use_environment);
        let mut config = Self::with_cache_dir(loader.get_cache_dir());

        for key in Self::config_keys() {
            config.sources.insert(key.to_string(), ConfigSource::Default);
        }

        if let Some(path) = config_file {
            let raw = loader.load_config_file(path)?;
            config.merge_raw_config(raw, ConfigSource::File)?;
        }

        if use_environment {
            config.apply_env_overrides(&loader)?;
        }

        Ok(config)
    }

    pub fn with_lock_mode(mut self, lock_mode: LockMode) -> Self {
        self.lock_mode = lock_mode;
        self.sources.insert("lock-mode".to_string(), ConfigSource::Command);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self.sources.insert("fetch-timeout".to_string(), ConfigSource::Command);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.sources.insert("max-retries".to_string(), ConfigSource::Command);
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self.sources.insert("busy-timeout".to_string(), ConfigSource::Command);
        self
    }

    pub fn set_cache_dir<P: AsRef<Path>>(&mut self, cache_dir: P) {
        self.cache_dir = cache_dir.as_ref().to_path_buf();
        self.sources.insert("cache-dir".to_string(), ConfigSource::Command);
    }

    /// Get the source of a configuration value
    pub fn get_source(&self, key: &str) -> Option<&ConfigSource> {
        self.sources.get(key)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig::new()
            .with_timeout(self.fetch_timeout)
            .with_connect_timeout(self.connect_timeout)
            .with_max_retries(self.max_retries)
    }

    fn config_keys() -> &'static [&'static str] {
        &[
            "cache-dir",
            "fetch-timeout",
            "connect-timeout",
            "max-retries",
            "lock-mode",
            "busy-timeout",
        ]
    }

    fn merge_raw_config(&mut self, raw: RawConfig, source: ConfigSource) -> Result<()> {
        for (key, value) in raw.values {
            self.merge_config_value(&key, value, source.clone())?;
        }
        Ok(())
    }

    fn merge_config_value(
        &mut self,
        key: &str,
        value: serde_json::Value,
        source: ConfigSource,
    ) -> Result<()> {
        let invalid = || {
            AssetError::Config(format!("invalid value for \"{}\" in {}", key, source.as_str()))
        };

        match key {
            "cache-dir" => {
                let s = value.as_str().ok_or_else(invalid)?;
                self.cache_dir = PathBuf::from(s);
            }
            "fetch-timeout" => {
                self.fetch_timeout = Duration::from_secs(value.as_u64().ok_or_else(invalid)?);
            }
            "connect-timeout" => {
                self.connect_timeout = Duration::from_secs(value.as_u64().ok_or_else(invalid)?);
            }
            "max-retries" => {
                let n = value.as_u64().ok_or_else(invalid)?;
                self.max_retries = u32::try_from(n).map_err(|_| invalid())?;
            }
            "lock-mode" => {
                let s = value.as_str().ok_or_else(invalid)?;
                self.lock_mode = LockMode::from_str(s).ok_or_else(invalid)?;
            }
            "busy-timeout" => {
                self.busy_timeout = Duration::from_secs(value.as_u64().ok_or_else(invalid)?);
            }
            other => {
                log::warn!("Ignoring unknown configuration key \"{}\"", other);
                return Ok(());
            }
        }

        self.sources.insert(key.to_string(), source);
        Ok(())
    }

    fn apply_env_overrides(&mut self, loader: &ConfigLoader) -> Result<()> {
        for key in Self::config_keys() {
            let Some(raw) = loader.get_env_config(key) else {
                continue;
            };
            let value = match *key {
                "cache-dir" | "lock-mode" => serde_json::Value::String(raw),
                _ => {
                    let n: u64 = raw.trim().parse().map_err(|_| {
                        AssetError::Config(format!(
                            "{} must be a non-negative integer, got \"{}\"",
                            ConfigLoader::env_var_name(key),
                            raw
                        ))
                    })?;
                    serde_json::Value::from(n)
                }
            };
            self.merge_config_value(
                key,
                value,
                ConfigSource::Environment(ConfigLoader::env_var_name(key)),
            )?;
        }
        Ok(())
    }
}
