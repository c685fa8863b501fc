//! Install coordinator.
//!
//! Fetches, verifies and expands assets behind a durable content-addressed
//! cache. Concurrent requests for the same hash collapse into a single
//! install: the first caller installs, everyone else waits on the install
//! lock and then finds the record written by the winner.

use async_trait::async_trait;
use fs4::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::asset::{AssetSpec, RuntimeAsset, RuntimeAssetSet};
use crate::config::LockMode;
use crate::downloader::{verify_checksum, ArchiveExtractor, Fetcher};
use crate::store::{AssetStore, WriteTxn};
use crate::{AssetError, Result};

pub const LOCKS_DIR: &str = ".locks";
pub const TMP_DIR: &str = ".tmp";

/// Resolves an asset spec into an installed asset.
///
/// `Ok(None)` means the asset does not apply to the caller.
#[async_trait]
pub trait Getter: Send + Sync {
    async fn get(
        &self,
        spec: &AssetSpec,
        cancel: &CancellationToken,
    ) -> Result<Option<RuntimeAsset>>;
}

/// Resolve every spec in order, skipping the ones that do not apply.
pub async fn get_all(
    getter: &dyn Getter,
    specs: &[AssetSpec],
    cancel: &CancellationToken,
) -> Result<RuntimeAssetSet> {
    let mut set = RuntimeAssetSet::new();
    for spec in specs {
        if let Some(asset) = getter.get(spec, cancel).await? {
            set.push(asset);
        }
    }
    Ok(set)
}

pub struct Coordinator {
    store: Arc<AssetStore>,
    cache_root: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    lock_mode: LockMode,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    global_lock: tokio::sync::Mutex<()>,
    tracker: TaskTracker,
}

impl Coordinator {
    pub fn new(
        store: Arc<AssetStore>,
        cache_root: impl Into<PathBuf>,
        fetcher: Arc<dyn Fetcher>,
        lock_mode: LockMode,
    ) -> Self {
        Self {
            store,
            cache_root: cache_root.into(),
            fetcher,
            lock_mode,
            key_locks: Mutex::new(HashMap::new()),
            global_lock: tokio::sync::Mutex::new(()),
            tracker: TaskTracker::new(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    /// Tracks every in-flight `get`. Closing it stops new requests from
    /// being admitted.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Return the installed asset for `spec`, installing it first if needed.
    pub async fn get(&self, spec: &AssetSpec, cancel: &CancellationToken) -> Result<RuntimeAsset> {
        if self.tracker.is_closed() {
            return Err(AssetError::Store("asset manager is shutting down".to_string()));
        }
        spec.validate()?;
        self.tracker.track_future(self.resolve(spec, cancel)).await
    }

    async fn resolve(&self, spec: &AssetSpec, cancel: &CancellationToken) -> Result<RuntimeAsset> {
        let key = spec.key();

        if let Some(asset) = self.lookup(&key).await? {
            log::debug!("Asset {} found in cache at {}", spec.name, asset.path.display());
            return Ok(asset);
        }

        if cancel.is_cancelled() {
            return Err(AssetError::Cancelled);
        }

        match self.lock_mode {
            LockMode::PerAsset => self.install_per_asset(spec, &key, cancel).await,
            LockMode::Global => self.install_global(spec, &key, cancel).await,
        }
    }

    async fn lookup(&self, key: &str) -> Result<Option<RuntimeAsset>> {
        let store = self.store.clone();
        let owned = key.to_string();
        let raw = blocking(move || store.get(&owned)).await?;
        Ok(raw.and_then(|value| decode_record(key, &value)))
    }

    async fn install_per_asset(
        &self,
        spec: &AssetSpec,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<RuntimeAsset> {
        let key_lock = self.key_lock(key);
        log::trace!("Waiting for install lock on {}", key);
        let _guard = tokio::select! {
            guard = key_lock.lock_owned() => guard,
            _ = cancel.cancelled() => return Err(AssetError::Cancelled),
        };

        let lock_path = self.cache_root.join(LOCKS_DIR).join(format!("{}.lock", key));
        let _file_lock = tokio::select! {
            lock = blocking(move || acquire_file_lock(&lock_path)) => lock?,
            _ = cancel.cancelled() => return Err(AssetError::Cancelled),
        };

        if let Some(asset) = self.lookup(key).await? {
            log::debug!("Asset {} was installed while waiting", spec.name);
            return Ok(asset);
        }

        let asset = self.install(spec, key, cancel).await?;
        let record = serde_json::to_string(&asset)?;

        let store = self.store.clone();
        let owned = key.to_string();
        blocking(move || store.put(&owned, &record)).await?;

        Ok(asset)
    }

    async fn install_global(
        &self,
        spec: &AssetSpec,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<RuntimeAsset> {
        log::trace!("Waiting for global install lock");
        let _guard = tokio::select! {
            guard = self.global_lock.lock() => guard,
            _ = cancel.cancelled() => return Err(AssetError::Cancelled),
        };

        // The write transaction stays open for the whole install so that
        // writers in other processes queue behind it as well.
        let store = self.store.clone();
        let owned = key.to_string();
        let (txn, existing) = tokio::select! {
            res = blocking(move || {
                let txn = store.begin_write()?;
                let existing = txn.get(&owned)?;
                Ok((txn, existing))
            }) => res?,
            _ = cancel.cancelled() => return Err(AssetError::Cancelled),
        };

        if let Some(asset) = existing.and_then(|value| decode_record(key, &value)) {
            log::debug!("Asset {} was installed while waiting", spec.name);
            blocking(move || txn.rollback()).await?;
            return Ok(asset);
        }

        let asset = self.install(spec, key, cancel).await?;
        let record = serde_json::to_string(&asset)?;

        let owned = key.to_string();
        blocking(move || commit_record(txn, &owned, &record)).await?;

        Ok(asset)
    }

    /// Fetch, verify and expand. Persists nothing.
    async fn install(
        &self,
        spec: &AssetSpec,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<RuntimeAsset> {
        let started = Instant::now();
        log::info!("Installing asset {} from {}", spec.name, spec.url);

        let temp_dir = self.cache_root.join(TMP_DIR);
        let temp = tokio::select! {
            temp = self.fetcher.fetch(&spec.url, &spec.headers, &temp_dir) => temp?,
            _ = cancel.cancelled() => return Err(AssetError::Cancelled),
        };

        if cancel.is_cancelled() {
            return Err(AssetError::Cancelled);
        }

        let expected = key.to_string();
        let temp = blocking(move || {
            let mut temp = temp;
            verify_checksum(temp.as_file_mut(), &expected)?;
            Ok(temp)
        })
        .await?;

        if cancel.is_cancelled() {
            return Err(AssetError::Cancelled);
        }

        let target = self.cache_root.join(key);
        let dest = target.clone();
        blocking(move || {
            let mut temp = temp;
            remove_stale_dir(&dest)?;
            if let Err(e) = ArchiveExtractor::extract(temp.as_file_mut(), &dest) {
                // Leave nothing half-extracted behind a missing record.
                if let Err(cleanup) = remove_stale_dir(&dest) {
                    log::warn!("Failed to clean up {}: {}", dest.display(), cleanup);
                }
                return Err(e);
            }
            Ok(())
        })
        .await?;

        log::info!(
            "Installed asset {} to {} in {:.2?}",
            spec.name,
            target.display(),
            started.elapsed()
        );

        Ok(RuntimeAsset {
            name: Some(spec.name.clone()),
            path: target,
            sha512: Some(key.to_string()),
        })
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.key_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(key.to_string()).or_default().clone()
    }
}

#[async_trait]
impl Getter for Coordinator {
    async fn get(
        &self,
        spec: &AssetSpec,
        cancel: &CancellationToken,
    ) -> Result<Option<RuntimeAsset>> {
        Coordinator::get(self, spec, cancel).await.map(Some)
    }
}

fn decode_record(key: &str, value: &str) -> Option<RuntimeAsset> {
    match serde_json::from_str(value) {
        Ok(asset) => Some(asset),
        Err(e) => {
            log::warn!("Ignoring corrupt cache record for {}: {}", key, e);
            None
        }
    }
}

fn commit_record(txn: WriteTxn, key: &str, record: &str) -> Result<()> {
    txn.put(key, record)?;
    txn.commit()
}

fn acquire_file_lock(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    file.lock_exclusive()?;
    Ok(file)
}

fn remove_stale_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            log::debug!("Removed stale asset directory {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AssetError::Expand(format!(
            "Failed to remove stale directory {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Run blocking store or filesystem work off the async runtime.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AssetError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}
