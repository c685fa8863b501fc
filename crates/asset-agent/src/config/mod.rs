//! Agent configuration
//!
//! Values are merged from several sources, highest priority first:
//!
//! 1. Environment variables (`ASSET_*`)
//! 2. An optional JSON config file with kebab-case keys
//! 3. Built-in defaults
//!
//! # Example
//!
//! ```rust,no_run
//! use asset_agent::config::AgentConfig;
//! use std::path::Path;
//!
//! let config = AgentConfig::build(Some(Path::new("/etc/asset-agent.json")), true).unwrap();
//! println!("Cache dir: {:?}", config.cache_dir);
//! println!("Lock mode: {}", config.lock_mode.as_str());
//! ```

mod config;
mod source;

pub use config::{AgentConfig, LockMode};
pub use source::{ConfigLoader, ConfigSource, RawConfig};
