//! Fetching asset archives into temporary files.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::http::HttpClient;
use crate::{AssetError, Result};

/// Retrieves the bytes behind an asset URL.
///
/// Implementations return a temporary file positioned at offset 0. The file
/// is deleted when the returned handle is dropped.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        temp_dir: &Path,
    ) -> Result<NamedTempFile>;
}

/// Fetcher for `http`, `https` and `file` URLs.
pub struct HttpFetcher {
    client: HttpClient,
}

impl HttpFetcher {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        temp_dir: &Path,
    ) -> Result<NamedTempFile> {
        let parsed = Url::parse(url).map_err(|e| AssetError::fetch(url, e))?;

        tokio::fs::create_dir_all(temp_dir)
            .await
            .map_err(|e| AssetError::fetch(url, format!("failed to create temp dir: {}", e)))?;
        let mut temp = tempfile::Builder::new()
            .prefix("asset-")
            .suffix(".download")
            .tempfile_in(temp_dir)
            .map_err(|e| AssetError::fetch(url, format!("failed to create temp file: {}", e)))?;
        let handle = temp
            .reopen()
            .map_err(|e| AssetError::fetch(url, format!("failed to open temp file: {}", e)))?;
        let mut dest = tokio::fs::File::from_std(handle);

        let size = if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| AssetError::fetch(url, "invalid file url"))?;
            copy_local(&path, &mut dest)
                .await
                .map_err(|e| AssetError::fetch(url, e))?
        } else {
            self.client
                .download_to(url, headers, &mut dest)
                .await
                .map_err(|e| AssetError::fetch(url, e))?
        };
        drop(dest);

        temp.as_file_mut().seek(SeekFrom::Start(0))?;
        log::debug!("Fetched {} ({} bytes)", url, size);
        Ok(temp)
    }
}

async fn copy_local(path: &Path, dest: &mut tokio::fs::File) -> std::io::Result<u64> {
    let mut source = tokio::fs::File::open(path).await?;
    let size = tokio::io::copy(&mut source, dest).await?;
    dest.flush().await?;
    dest.sync_all().await?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fetch_file_url() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("asset.tar");
        std::fs::write(&source, b"archive bytes").unwrap();
        let url = Url::from_file_path(&source).unwrap();

        let fetcher = HttpFetcher::new(HttpClient::new().unwrap());
        let mut temp = fetcher
            .fetch(url.as_str(), &BTreeMap::new(), &dir.path().join("tmp"))
            .await
            .unwrap();

        let mut content = Vec::new();
        temp.as_file_mut().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"archive bytes");
        assert!(temp.path().starts_with(dir.path().join("tmp")));
    }

    #[tokio::test]
    async fn test_fetch_missing_file_is_fetch_error() {
        let dir = TempDir::new().unwrap();
        let url = Url::from_file_path(dir.path().join("missing.tar")).unwrap();

        let fetcher = HttpFetcher::new(HttpClient::new().unwrap());
        let result = fetcher
            .fetch(url.as_str(), &BTreeMap::new(), &dir.path().join("tmp"))
            .await;

        assert!(matches!(result, Err(AssetError::Fetch { .. })));
    }

    #[tokio::test]
    async fn test_temp_file_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("asset.tar");
        std::fs::write(&source, b"x").unwrap();
        let url = Url::from_file_path(&source).unwrap();

        let fetcher = HttpFetcher::new(HttpClient::new().unwrap());
        let temp = fetcher
            .fetch(url.as_str(), &BTreeMap::new(), &dir.path().join("tmp"))
            .await
            .unwrap();
        let path = temp.path().to_path_buf();
        assert!(path.exists());

        drop(temp);
        assert!(!path.exists());
    }
}
