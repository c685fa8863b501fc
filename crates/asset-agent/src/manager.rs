//! Lifecycle of the asset cache.
//!
//! A [`Manager`] opens the store under the configured cache directory and
//! wires the fetcher, coordinator and filter into a single [`Getter`](crate::coordinator::Getter). When
//! the shutdown token fires, new requests are refused, in-flight requests are
//! allowed to finish and the store is closed.

use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::coordinator::{blocking, Coordinator};
use crate::downloader::{Fetcher, HttpFetcher};
use crate::filter::{ExpressionEvaluator, FilteredGetter, PredicateEvaluator};
use crate::http::HttpClient;
use crate::store::AssetStore;
use crate::{AssetError, Result};

pub struct Manager {
    config: AgentConfig,
    entity: Value,
    fetcher: Option<Arc<dyn Fetcher>>,
    evaluator: Arc<dyn PredicateEvaluator>,
}

impl Manager {
    pub fn new(config: AgentConfig, entity: Value) -> Self {
        Self {
            config,
            entity,
            fetcher: None,
            evaluator: Arc::new(ExpressionEvaluator::new()),
        }
    }

    /// Replace the default HTTP fetcher.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Replace the built-in expression evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn PredicateEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Open the store and start serving requests until `shutdown` fires.
    pub async fn start(self, shutdown: CancellationToken) -> Result<RunningManager> {
        let Manager {
            config,
            entity,
            fetcher,
            evaluator,
        } = self;

        let cache_dir = config.cache_dir.clone();
        tokio::fs::create_dir_all(&cache_dir).await.map_err(|e| {
            AssetError::Store(format!(
                "failed to create cache directory {}: {}",
                cache_dir.display(),
                e
            ))
        })?;

        let busy_timeout = config.busy_timeout;
        let root = cache_dir.clone();
        let store = Arc::new(blocking(move || AssetStore::open(&root, busy_timeout)).await?);

        let fetcher = match fetcher {
            Some(fetcher) => fetcher,
            None => {
                let client = HttpClient::with_config(config.http_client_config()).map_err(|e| {
                    AssetError::Config(format!("failed to build HTTP client: {}", e))
                })?;
                Arc::new(HttpFetcher::new(client)) as Arc<dyn Fetcher>
            }
        };

        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            cache_dir.clone(),
            fetcher,
            config.lock_mode,
        ));
        let getter = Arc::new(FilteredGetter::new(
            coordinator.clone(),
            entity,
            evaluator,
        ));

        log::info!(
            "Asset manager started (cache: {}, lock mode: {})",
            cache_dir.display(),
            config.lock_mode.as_str()
        );

        let tracker = coordinator.tracker().clone();
        let closing = store.clone();
        let handle = tokio::spawn(async move {
            shutdown.cancelled().await;
            log::debug!(
                "Shutting down asset manager, {} request(s) in flight",
                tracker.len()
            );
            tracker.close();
            tracker.wait().await;
            blocking(move || closing.close()).await?;
            log::info!("Asset manager stopped");
            Ok::<(), AssetError>(())
        });

        Ok(RunningManager {
            coordinator,
            getter,
            store,
            handle,
        })
    }
}

/// A started [`Manager`].
pub struct RunningManager {
    coordinator: Arc<Coordinator>,
    getter: Arc<FilteredGetter>,
    store: Arc<AssetStore>,
    handle: JoinHandle<Result<()>>,
}

impl RunningManager {
    /// Entry point for resolving assets for the configured entity.
    pub fn getter(&self) -> Arc<FilteredGetter> {
        self.getter.clone()
    }

    /// The unfiltered coordinator.
    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator.clone()
    }

    pub fn store(&self) -> Arc<AssetStore> {
        self.store.clone()
    }

    /// Resolves once shutdown has completed and the store is closed.
    pub async fn wait(self) -> Result<()> {
        self.handle
            .await
            .map_err(|e| AssetError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}
