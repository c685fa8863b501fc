//! Asset declarations and installed runtime assets.
//!
//! An [`AssetSpec`] is what the resource store hands us; a [`RuntimeAsset`]
//! only exists once the archive behind a spec has been fetched, verified and
//! expanded under the cache root.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{AssetError, Result};

/// Length of a hex-encoded SHA-512 digest.
pub const SHA512_HEX_LEN: usize = 128;

#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: char = ':';

/// Declaration of a downloadable asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    pub url: String,

    pub sha512: String,

    /// Predicate expressions; every one must hold for the asset to apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,

    /// Extra request headers sent when fetching `url`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl AssetSpec {
    pub fn new(name: impl Into<String>, url: impl Into<String>, sha512: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            sha512: sha512.into(),
            ..Default::default()
        }
    }

    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = filters.into_iter().map(Into::into).collect();
        self
    }

    /// Cache key for this asset: the lowercased hex digest.
    pub fn key(&self) -> String {
        self.sha512.to_ascii_lowercase()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AssetError::InvalidSpec("name must not be empty".to_string()));
        }

        let url = url::Url::parse(&self.url).map_err(|e| {
            AssetError::InvalidSpec(format!("{}: invalid url {}: {}", self.name, self.url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https" | "file") {
            return Err(AssetError::InvalidSpec(format!(
                "{}: unsupported url scheme \"{}\"",
                self.name,
                url.scheme()
            )));
        }

        if self.sha512.len() != SHA512_HEX_LEN
            || !self.sha512.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(AssetError::InvalidSpec(format!(
                "{}: sha512 must be {} hex characters",
                self.name, SHA512_HEX_LEN
            )));
        }

        Ok(())
    }
}

/// An asset that has been installed into the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuntimeAsset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
}

impl RuntimeAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            name: None,
            path: path.into(),
            sha512: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.path.join("bin")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.path.join("lib")
    }

    pub fn include_dir(&self) -> PathBuf {
        self.path.join("include")
    }

    /// `PATH`, `LD_LIBRARY_PATH` and `CPATH` assignments with this asset's
    /// directories prepended to the current process values.
    pub fn env(&self) -> Vec<String> {
        compose_env(std::slice::from_ref(self), |key| env::var(key).ok())
    }
}

/// Ordered set of runtime assets for one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeAssetSet {
    assets: Vec<RuntimeAsset>,
}

impl RuntimeAssetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, asset: RuntimeAsset) {
        self.assets.push(asset);
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RuntimeAsset> {
        self.assets.iter()
    }

    pub fn as_slice(&self) -> &[RuntimeAsset] {
        &self.assets
    }

    /// Like [`RuntimeAsset::env`], folded over every asset in set order.
    pub fn env(&self) -> Vec<String> {
        compose_env(&self.assets, |key| env::var(key).ok())
    }

    /// Same as [`RuntimeAssetSet::env`] with an explicit parent environment.
    pub fn env_with<F>(&self, parent: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        compose_env(&self.assets, parent)
    }
}

impl From<Vec<RuntimeAsset>> for RuntimeAssetSet {
    fn from(assets: Vec<RuntimeAsset>) -> Self {
        Self { assets }
    }
}

impl FromIterator<RuntimeAsset> for RuntimeAssetSet {
    fn from_iter<T: IntoIterator<Item = RuntimeAsset>>(iter: T) -> Self {
        Self {
            assets: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for RuntimeAssetSet {
    type Item = RuntimeAsset;
    type IntoIter = std::vec::IntoIter<RuntimeAsset>;

    fn into_iter(self) -> Self::IntoIter {
        self.assets.into_iter()
    }
}

impl<'a> IntoIterator for &'a RuntimeAssetSet {
    type Item = &'a RuntimeAsset;
    type IntoIter = std::slice::Iter<'a, RuntimeAsset>;

    fn into_iter(self) -> Self::IntoIter {
        self.assets.iter()
    }
}

fn compose_env<F>(assets: &[RuntimeAsset], parent: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let vars: [(&str, fn(&RuntimeAsset) -> PathBuf); 3] = [
        ("PATH", RuntimeAsset::bin_dir),
        ("LD_LIBRARY_PATH", RuntimeAsset::lib_dir),
        ("CPATH", RuntimeAsset::include_dir),
    ];

    vars.iter()
        .map(|&(key, dir)| {
            let mut parts: Vec<String> = assets
                .iter()
                .map(|asset| dir(asset).to_string_lossy().into_owned())
                .collect();
            // An unset parent must not leave an empty list element behind.
            if let Some(existing) = parent(key).filter(|value| !value.is_empty()) {
                parts.push(existing);
            }
            let separator = PATH_LIST_SEPARATOR.to_string();
            format!("{}={}", key, parts.join(&separator))
        })
        .collect()
}
