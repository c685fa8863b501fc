/// Integration tests for the install coordinator
///
/// These drive the full fetch, verify and expand pipeline through the
/// coordinator with an in-memory fetcher, covering single-flight installs,
/// self-healing of corrupt records and failure paths.

use asset_agent::config::LockMode;
use asset_agent::downloader::compute_sha512;
use asset_agent::{AssetError, AssetSpec, AssetStore, Coordinator, Fetcher, Result, Stage};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, HashMap};
use std::io::{Seek, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeFetcher {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn serve(&self, url: &str, body: Vec<u8>) {
        self.bodies.lock().unwrap().insert(url.to_string(), body);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        url: &str,
        _headers: &BTreeMap<String, String>,
        temp_dir: &Path,
    ) -> Result<NamedTempFile> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let body = self.bodies.lock().unwrap().get(url).cloned();
        let body = body.ok_or_else(|| AssetError::fetch(url, "HTTP 404"))?;

        std::fs::create_dir_all(temp_dir)?;
        let mut temp = NamedTempFile::new_in(temp_dir)?;
        temp.write_all(&body)?;
        temp.flush()?;
        temp.rewind()?;
        Ok(temp)
    }
}

struct Harness {
    dir: TempDir,
    store: Arc<AssetStore>,
    fetcher: Arc<FakeFetcher>,
    coordinator: Arc<Coordinator>,
}

fn harness(lock_mode: LockMode, delay: Duration) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(AssetStore::open(dir.path(), Duration::from_secs(30)).unwrap());
    let fetcher = Arc::new(FakeFetcher::with_delay(delay));
    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        dir.path(),
        fetcher.clone(),
        lock_mode,
    ));
    Harness {
        dir,
        store,
        fetcher,
        coordinator,
    }
}

fn tar_with(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn sha512(data: &[u8]) -> String {
    compute_sha512(&mut &data[..]).unwrap()
}

/// Serve `body` at `url` and return a spec pointing at it.
fn publish(h: &Harness, name: &str, url: &str, body: Vec<u8>) -> AssetSpec {
    let spec = AssetSpec::new(name, url, sha512(&body));
    h.fetcher.serve(url, body);
    spec
}

fn tool_archive(name: &str) -> Vec<u8> {
    let path = format!("bin/{}", name);
    let script = format!("#!/bin/sh\necho {}\n", name);
    gzip(&tar_with(&[(path.as_str(), script.as_bytes())]))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_install_once() {
    for lock_mode in [LockMode::PerAsset, LockMode::Global] {
        let h = harness(lock_mode, Duration::from_millis(200));
        let spec = publish(&h, "tool", "https://assets.example.com/tool.tar.gz", tool_archive("tool"));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let coordinator = h.coordinator.clone();
            let spec = spec.clone();
            handles.push(tokio::spawn(async move {
                coordinator.get(&spec, &CancellationToken::new()).await
            }));
        }

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap().path);
        }

        assert_eq!(h.fetcher.calls(), 1, "{:?}", lock_mode);
        assert!(paths.iter().all(|p| *p == h.dir.path().join(&spec.sha512)));
        assert!(paths[0].join("bin/tool").is_file());
    }
}

#[tokio::test]
async fn test_cache_hit_needs_no_fetcher() {
    let h = harness(LockMode::PerAsset, Duration::ZERO);
    let spec = publish(&h, "tool", "https://assets.example.com/tool.tar.gz", tool_archive("tool"));
    let cancel = CancellationToken::new();

    let first = h.coordinator.get(&spec, &cancel).await.unwrap();

    // A second coordinator over the same cache, with nothing to fetch from.
    let empty = Arc::new(FakeFetcher::default());
    let other = Coordinator::new(h.store.clone(), h.dir.path(), empty.clone(), LockMode::PerAsset);
    let second = other.get(&spec, &cancel).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(empty.calls(), 0);
}

#[tokio::test]
async fn test_same_hash_different_name_shares_directory() {
    let h = harness(LockMode::PerAsset, Duration::ZERO);
    let spec = publish(&h, "tool", "https://assets.example.com/tool.tar.gz", tool_archive("tool"));
    let mut alias = spec.clone();
    alias.name = "tool-alias".to_string();
    alias.url = "https://mirror.example.com/tool.tar.gz".to_string();
    let cancel = CancellationToken::new();

    let a = h.coordinator.get(&spec, &cancel).await.unwrap();
    let b = h.coordinator.get(&alias, &cancel).await.unwrap();

    assert_eq!(a.path, b.path);
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_corrupt_record_is_reinstalled() {
    let h = harness(LockMode::PerAsset, Duration::ZERO);
    let spec = publish(&h, "tool", "https://assets.example.com/tool.tar.gz", tool_archive("tool"));
    let cancel = CancellationToken::new();

    h.coordinator.get(&spec, &cancel).await.unwrap();
    h.store.put(&spec.key(), "{not json").unwrap();

    let healed = h.coordinator.get(&spec, &cancel).await.unwrap();
    assert_eq!(h.fetcher.calls(), 2);
    assert!(healed.bin_dir().join("tool").is_file());

    let record = h.store.get(&spec.key()).unwrap().unwrap();
    let decoded: asset_agent::RuntimeAsset = serde_json::from_str(&record).unwrap();
    assert_eq!(decoded, healed);
}

#[tokio::test]
async fn test_corrupt_record_is_reinstalled_in_global_mode() {
    let h = harness(LockMode::Global, Duration::ZERO);
    let spec = publish(&h, "tool", "https://assets.example.com/tool.tar.gz", tool_archive("tool"));
    h.store.put(&spec.key(), "[]").unwrap();

    let asset = h.coordinator.get(&spec, &CancellationToken::new()).await.unwrap();
    assert_eq!(h.fetcher.calls(), 1);
    assert!(serde_json::from_str::<asset_agent::RuntimeAsset>(
        &h.store.get(&spec.key()).unwrap().unwrap()
    )
    .is_ok());
    assert!(asset.path.exists());
}

#[tokio::test]
async fn test_checksum_mismatch_installs_nothing() {
    let h = harness(LockMode::PerAsset, Duration::ZERO);
    let url = "https://assets.example.com/tool.tar.gz";
    let body = tool_archive("tool");
    h.fetcher.serve(url, body.clone());
    let cancel = CancellationToken::new();

    let wrong = AssetSpec::new("tool", url, sha512(b"something else"));
    let err = h.coordinator.get(&wrong, &cancel).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Verify);
    match &err {
        AssetError::Verify { expected, actual } => {
            assert_eq!(expected, &wrong.sha512);
            assert_eq!(actual, &sha512(&body));
        }
        other => panic!("expected verify error, got {:?}", other),
    }
    assert_eq!(h.store.get(&wrong.key()).unwrap(), None);
    assert!(!h.dir.path().join(&wrong.sha512).exists());

    let right = AssetSpec::new("tool", url, sha512(&body));
    let asset = h.coordinator.get(&right, &cancel).await.unwrap();
    assert!(asset.bin_dir().join("tool").is_file());
}

#[tokio::test]
async fn test_uppercase_hash_is_normalized() {
    let h = harness(LockMode::PerAsset, Duration::ZERO);
    let body = tool_archive("tool");
    let lower = sha512(&body);
    let url = "https://assets.example.com/tool.tar.gz";
    h.fetcher.serve(url, body);

    let spec = AssetSpec::new("tool", url, lower.to_uppercase());
    let asset = h.coordinator.get(&spec, &CancellationToken::new()).await.unwrap();
    assert_eq!(asset.path, h.dir.path().join(&lower));
    assert!(h.store.get(&lower).unwrap().is_some());
}

#[tokio::test]
async fn test_archive_type_detected_by_content() {
    let h = harness(LockMode::PerAsset, Duration::ZERO);
    let cancel = CancellationToken::new();

    // gzip-compressed tar behind a misleading extension
    let gz = publish(&h, "gz", "https://assets.example.com/gz.zip", tool_archive("gz"));
    assert!(h.coordinator.get(&gz, &cancel).await.unwrap().bin_dir().join("gz").is_file());

    // plain tar without any extension
    let plain = publish(
        &h,
        "plain",
        "https://assets.example.com/plain",
        tar_with(&[("lib/libplain.so", &b"\x7fELF"[..])]),
    );
    assert!(h.coordinator.get(&plain, &cancel).await.unwrap().lib_dir().join("libplain.so").is_file());
}

#[tokio::test]
async fn test_zip_archive_is_rejected() {
    let h = harness(LockMode::PerAsset, Duration::ZERO);

    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    zip.start_file("bin/tool", zip::write::SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"#!/bin/sh\n").unwrap();
    let body = zip.finish().unwrap().into_inner();

    let spec = publish(&h, "zipped", "https://assets.example.com/tool.tar.gz", body);
    let err = h.coordinator.get(&spec, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, AssetError::UnsupportedArchive { .. }));
    let msg = err.to_string();
    assert!(msg.contains("does not appear valid"), "{}", msg);
    assert!(msg.contains("application/zip"), "{}", msg);
    assert_eq!(h.store.get(&spec.key()).unwrap(), None);
}

#[tokio::test]
async fn test_unknown_content_is_rejected() {
    let h = harness(LockMode::PerAsset, Duration::ZERO);
    let spec = publish(&h, "text", "https://assets.example.com/tool.tar", b"just some text".to_vec());

    let err = h.coordinator.get(&spec, &CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().contains("application/octet-stream"));
}

#[tokio::test]
async fn test_truncated_archive_leaves_nothing_behind() {
    let h = harness(LockMode::PerAsset, Duration::ZERO);
    let full = tool_archive("tool");
    let truncated = full[..full.len() - 12].to_vec();
    let spec = publish(&h, "broken", "https://assets.example.com/broken.tar.gz", truncated);

    let err = h.coordinator.get(&spec, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Expand);
    assert_eq!(h.store.get(&spec.key()).unwrap(), None);
    assert!(!h.dir.path().join(&spec.sha512).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_install_is_retried_one_at_a_time() {
    let h = harness(LockMode::PerAsset, Duration::from_millis(50));
    // Nothing served at this URL: every fetch fails.
    let spec = AssetSpec::new("missing", "https://assets.example.com/missing.tar.gz", "ab".repeat(64));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let coordinator = h.coordinator.clone();
        let spec = spec.clone();
        handles.push(tokio::spawn(async move {
            coordinator.get(&spec, &CancellationToken::new()).await
        }));
    }
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.stage(), Stage::Fetch);
    }

    assert_eq!(h.fetcher.calls(), 4);
    assert_eq!(h.fetcher.max_in_flight(), 1);
    assert_eq!(h.store.get(&spec.key()).unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lock_modes_differ_in_parallelism() {
    for (lock_mode, expected) in [(LockMode::PerAsset, 2), (LockMode::Global, 1)] {
        let h = harness(lock_mode, Duration::from_millis(300));
        let a = publish(&h, "a", "https://assets.example.com/a.tar.gz", tool_archive("a"));
        let b = publish(&h, "b", "https://assets.example.com/b.tar.gz", tool_archive("b"));

        let (ca, cb) = (CancellationToken::new(), CancellationToken::new());
        let (ra, rb) = tokio::join!(h.coordinator.get(&a, &ca), h.coordinator.get(&b, &cb));
        ra.unwrap();
        rb.unwrap();

        assert_eq!(h.fetcher.calls(), 2);
        assert_eq!(h.fetcher.max_in_flight(), expected, "{:?}", lock_mode);
    }
}

#[tokio::test]
async fn test_cancel_during_fetch() {
    let h = harness(LockMode::PerAsset, Duration::from_secs(30));
    let spec = publish(&h, "slow", "https://assets.example.com/slow.tar.gz", tool_archive("slow"));
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = h.coordinator.get(&spec, &cancel).await.unwrap_err();
    assert!(matches!(err, AssetError::Cancelled));
    assert_eq!(h.store.get(&spec.key()).unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_while_waiting_for_install_lock() {
    for lock_mode in [LockMode::PerAsset, LockMode::Global] {
        let h = harness(lock_mode, Duration::from_millis(500));
        let spec = publish(&h, "tool", "https://assets.example.com/tool.tar.gz", tool_archive("tool"));

        let coordinator = h.coordinator.clone();
        let first_spec = spec.clone();
        let first = tokio::spawn(async move {
            coordinator.get(&first_spec, &CancellationToken::new()).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let waiter = h.coordinator.get(&spec, &cancel).await;
        assert!(matches!(waiter, Err(AssetError::Cancelled)), "{:?}", lock_mode);

        assert!(first.await.unwrap().is_ok());
        assert_eq!(h.fetcher.calls(), 1);
    }
}
