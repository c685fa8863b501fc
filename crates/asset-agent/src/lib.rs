//! Content-addressed cache of runtime assets.
//!
//! Assets are archives identified by their SHA-512 digest. The first request
//! for an asset fetches it, verifies the digest and expands it under
//! `<cache>/<sha512>`; later requests, from any task or process sharing the
//! cache, are served from the durable index without touching the network.
//!
//! ```rust,no_run
//! use asset_agent::{get_all, AgentConfig, AssetSpec, Manager};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(specs: Vec<AssetSpec>) -> asset_agent::Result<()> {
//! let shutdown = CancellationToken::new();
//! let config = AgentConfig::build(None, true)?;
//! let running = Manager::new(config, serde_json::json!({"system": {"os": "linux"}}))
//!     .start(shutdown.clone())
//!     .await?;
//!
//! let getter = running.getter();
//! let assets = get_all(getter.as_ref(), &specs, &shutdown).await?;
//! for var in assets.env() {
//!     println!("{}", var);
//! }
//!
//! shutdown.cancel();
//! running.wait().await
//! # }
//! ```

pub mod asset;
pub mod config;
pub mod coordinator;
pub mod downloader;
pub mod error;
pub mod filter;
pub mod http;
pub mod manager;
pub mod store;

pub use asset::{AssetSpec, RuntimeAsset, RuntimeAssetSet};
pub use config::{AgentConfig, LockMode};
pub use coordinator::{get_all, Coordinator, Getter};
pub use downloader::{Fetcher, HttpFetcher};
pub use error::{AssetError, Result, Stage};
pub use filter::{is_applicable, EvalError, ExpressionEvaluator, FilteredGetter, PredicateEvaluator};
pub use manager::{Manager, RunningManager};
pub use store::AssetStore;
