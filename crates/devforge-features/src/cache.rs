//! Content-addressed package cache.
//!
//! On-disk layout under the cache root:
//!
//! ```text
//! blobs/<hex>          package archive as downloaded
//! packages/<hex>/      unpacked package
//! entries/<hex>.json   CacheEntry record; its presence marks the entry complete
//! refs/<key>.json      (identifier, constraint) → digest and manifest
//! tmp/                 staging area for in-flight writes
//! ```
//!
//! Writes are staged under `tmp/` and renamed into place only after the
//! archive hashed to its digest and unpacked cleanly, so concurrent
//! processes sharing one cache never observe partial entries. A process
//! that loses a promotion race keeps the winner's copy. Within a process,
//! one writer per digest is enforced with an async mutex; callers asking
//! for a digest that is being fetched wait for that fetch.

use std::collections::HashMap;
use std::future::Future;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use devforge_common::error::CacheError;
use devforge_common::types::Sha256Digest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{hash_bytes, verify_bytes, verify_file};

/// Downloads per digest before a corrupt package becomes a hard error.
const MAX_FETCH_ATTEMPTS: usize = 2;

const BLOBS_DIR: &str = "blobs";
const PACKAGES_DIR: &str = "packages";
const ENTRIES_DIR: &str = "entries";
const REFS_DIR: &str = "refs";
const TMP_DIR: &str = "tmp";

/// A complete cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Digest of the package archive.
    pub digest: Sha256Digest,
    /// Directory holding the unpacked package.
    pub local_path: PathBuf,
    /// When the package was downloaded.
    pub fetched_at: DateTime<Utc>,
    /// Size of the archive in bytes.
    pub size_bytes: u64,
}

/// What a `(identifier, constraint)` pair last resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefRecord {
    /// Registry identifier.
    pub identifier: String,
    /// Constraint as written.
    pub constraint: String,
    /// Tag or digest reference that was fetched.
    pub reference: String,
    /// Package digest.
    pub digest: Sha256Digest,
    /// Manifest text as published.
    pub manifest: String,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

/// Failure of [`PackageCache::get_or_fetch`].
#[derive(Debug, Error)]
pub enum FetchError<E> {
    /// The cache itself failed.
    #[error(transparent)]
    Cache(CacheError),
    /// The fetch callback failed.
    #[error("{0}")]
    Source(E),
}

/// Hit and download counts for one cache session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from disk.
    pub hits: usize,
    /// Packages downloaded and stored.
    pub stored: usize,
    /// Entries discarded as corrupt.
    pub evicted_corrupt: usize,
}

/// The package cache rooted at one directory.
#[derive(Debug)]
pub struct PackageCache {
    root: PathBuf,
    inflight: Mutex<HashMap<Sha256Digest, Arc<tokio::sync::Mutex<()>>>>,
    hits: AtomicUsize,
    stored: AtomicUsize,
    evicted_corrupt: AtomicUsize,
}

impl PackageCache {
    /// Opens or initializes the cache at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory layout cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        tracing::info!(path = %root.display(), "opening package cache");
        for dir in [BLOBS_DIR, PACKAGES_DIR, ENTRIES_DIR, REFS_DIR, TMP_DIR] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path).map_err(CacheError::io(&path))?;
        }
        Ok(Self {
            root,
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            stored: AtomicUsize::new(0),
            evicted_corrupt: AtomicUsize::new(0),
        })
    }

    /// Returns the root cache path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory an unpacked package lives in.
    #[must_use]
    pub fn package_path(&self, digest: &Sha256Digest) -> PathBuf {
        self.root.join(PACKAGES_DIR).join(digest.as_hex())
    }

    fn blob_path(&self, digest: &Sha256Digest) -> PathBuf {
        self.root.join(BLOBS_DIR).join(digest.as_hex())
    }

    fn entry_path(&self, digest: &Sha256Digest) -> PathBuf {
        self.root
            .join(ENTRIES_DIR)
            .join(format!("{}.json", digest.as_hex()))
    }

    fn ref_path(&self, identifier: &str, constraint: &str) -> PathBuf {
        let key = hash_bytes(format!("{identifier}@{constraint}").as_bytes());
        self.root.join(REFS_DIR).join(format!("{}.json", key.as_hex()))
    }

    /// Returns the complete entry for `digest`.
    ///
    /// An entry whose archive no longer hashes to its digest, or whose
    /// files are missing, is evicted and reported as absent so the caller
    /// fetches it again.
    ///
    /// # Errors
    ///
    /// Returns an error only if the cache directory itself is unreadable.
    pub fn lookup(&self, digest: &Sha256Digest) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(digest);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path)(e)),
        };
        let verified = serde_json::from_str::<CacheEntry>(&text)
            .map_err(|e| CacheError::InvalidRecord {
                path: path.clone(),
                message: e.to_string(),
            })
            .and_then(|entry| {
                if !entry.local_path.is_dir() {
                    return Err(CacheError::InvalidRecord {
                        path: entry.local_path.clone(),
                        message: "package directory is missing".into(),
                    });
                }
                verify_file(&self.blob_path(digest), digest)?;
                Ok(entry)
            });
        match verified {
            Ok(entry) => {
                tracing::debug!(digest = %digest, "package cache hit");
                let _ = self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry))
            }
            Err(e) => {
                tracing::warn!(digest = %digest, error = %e, "discarding corrupt cache entry");
                let _ = self.evicted_corrupt.fetch_add(1, Ordering::Relaxed);
                self.evict(digest)?;
                Ok(None)
            }
        }
    }

    /// Returns the entry for `digest`, calling `fetch` to download it on a miss.
    ///
    /// Only one fetch per digest runs at a time; concurrent callers for the
    /// same digest wait and then find the entry on disk. Downloaded bytes
    /// that fail verification are fetched once more before giving up.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Source` if `fetch` fails, or `FetchError::Cache`
    /// if the package cannot be stored or stays corrupt.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        digest: &Sha256Digest,
        fetch: F,
    ) -> Result<CacheEntry, FetchError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
    {
        let lock = self.digest_lock(digest);
        let result = {
            let _guard = lock.lock().await;
            self.fetch_locked(digest, fetch).await
        };
        self.release_digest_lock(digest, lock);
        result
    }

    async fn fetch_locked<F, Fut, E>(
        &self,
        digest: &Sha256Digest,
        fetch: F,
    ) -> Result<CacheEntry, FetchError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
    {
        if let Some(entry) = self.lookup(digest).map_err(FetchError::Cache)? {
            return Ok(entry);
        }

        let mut attempt = 1;
        loop {
            tracing::info!(digest = %digest, attempt, "fetching package");
            let bytes = fetch().await.map_err(FetchError::Source)?;
            match self.store(digest, bytes).await {
                Ok(entry) => return Ok(entry),
                Err(e @ CacheError::Corrupt { .. }) if attempt < MAX_FETCH_ATTEMPTS => {
                    tracing::warn!(digest = %digest, error = %e, "downloaded package is corrupt, fetching again");
                    attempt += 1;
                }
                Err(e) => return Err(FetchError::Cache(e)),
            }
        }
    }

    /// Verifies, unpacks, and atomically promotes `bytes` as the package for `digest`.
    ///
    /// Losing a promotion race to another process counts as success: both
    /// wrote the same verified content.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Corrupt` if `bytes` do not hash to `digest`, or
    /// an extraction or I/O error.
    pub async fn store(&self, digest: &Sha256Digest, bytes: Vec<u8>) -> Result<CacheEntry, CacheError> {
        let layout = Layout {
            tmp: self.root.join(TMP_DIR),
            blob: self.blob_path(digest),
            package: self.package_path(digest),
            entry: self.entry_path(digest),
        };
        let digest = digest.clone();
        let tmp = layout.tmp.clone();
        let entry = tokio::task::spawn_blocking(move || store_blocking(&layout, &digest, &bytes))
            .await
            .map_err(|e| CacheError::Io {
                path: tmp,
                source: std::io::Error::other(e.to_string()),
            })??;
        let _ = self.stored.fetch_add(1, Ordering::Relaxed);
        tracing::info!(digest = %entry.digest, size = entry.size_bytes, "package cached");
        Ok(entry)
    }

    /// Removes the entry for `digest`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if existing files cannot be removed.
    pub fn evict(&self, digest: &Sha256Digest) -> Result<(), CacheError> {
        remove_file_if_present(&self.entry_path(digest))?;
        self.discard_package(&self.package_path(digest))?;
        remove_file_if_present(&self.blob_path(digest))
    }

    /// Moves a package directory out of `packages/` in one rename, then
    /// deletes it, so a writer promoting the same digest never sees a
    /// half-deleted directory.
    fn discard_package(&self, package: &Path) -> Result<(), CacheError> {
        let tmp = self.root.join(TMP_DIR);
        let graveyard = tempfile::Builder::new()
            .prefix(".evict-")
            .tempdir_in(&tmp)
            .map_err(CacheError::io(&tmp))?;
        let target = graveyard.path().join("package");
        match std::fs::rename(package, &target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CacheError::io(package)(e)),
        }
        graveyard.close().map_err(CacheError::io(&target))
    }

    /// Lists complete entries, ordered by digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the entries directory cannot be read.
    pub fn list(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let dir = self.root.join(ENTRIES_DIR);
        let mut entries = Vec::new();
        for item in std::fs::read_dir(&dir).map_err(CacheError::io(&dir))? {
            let path = item.map_err(CacheError::io(&dir))?.path();
            let parsed = std::fs::read_to_string(&path)
                .ok()
                .and_then(|text| serde_json::from_str::<CacheEntry>(&text).ok());
            match parsed {
                Some(entry) => entries.push(entry),
                None => tracing::warn!(path = %path.display(), "skipping unreadable cache record"),
            }
        }
        entries.sort_by(|a, b| a.digest.cmp(&b.digest));
        Ok(entries)
    }

    /// Removes every entry and reference record. Returns how many entries were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a cache directory cannot be emptied.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let removed = self.list()?.len();
        for dir in [ENTRIES_DIR, REFS_DIR, PACKAGES_DIR, BLOBS_DIR] {
            let path = self.root.join(dir);
            remove_dir_if_present(&path)?;
            std::fs::create_dir_all(&path).map_err(CacheError::io(&path))?;
        }
        tracing::info!(removed, "package cache cleared");
        Ok(removed)
    }

    /// Returns the record for `(identifier, constraint)` if one was written.
    #[must_use]
    pub fn lookup_ref(&self, identifier: &str, constraint: &str) -> Option<RefRecord> {
        let path = self.ref_path(identifier, constraint);
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<RefRecord>(&text) {
            Ok(record) if record.identifier == identifier && record.constraint == constraint => {
                Some(record)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable reference record");
                None
            }
        }
    }

    /// Records what `(identifier, constraint)` resolved to.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn record_ref(&self, record: &RefRecord) -> Result<(), CacheError> {
        let path = self.ref_path(&record.identifier, &record.constraint);
        let json = serde_json::to_vec_pretty(record).map_err(|e| CacheError::InvalidRecord {
            path: path.clone(),
            message: e.to_string(),
        })?;
        write_atomically(&self.root.join(TMP_DIR), &path, &json)
    }

    /// Ends the cache session and returns its counters.
    ///
    /// Staged writes never outlive the call that made them, so there is
    /// nothing to flush; the session totals are logged and returned.
    pub fn close(&self) -> CacheStats {
        let stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            evicted_corrupt: self.evicted_corrupt.load(Ordering::Relaxed),
        };
        tracing::info!(
            hits = stats.hits,
            stored = stats.stored,
            evicted = stats.evicted_corrupt,
            "closing package cache"
        );
        stats
    }

    fn digest_lock(&self, digest: &Sha256Digest) -> Arc<tokio::sync::Mutex<()>> {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(inflight.entry(digest.clone()).or_default())
    }

    /// Drops the caller's handle and forgets the lock once nobody else holds it.
    fn release_digest_lock(&self, digest: &Sha256Digest, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        drop(lock);
        if inflight
            .get(digest)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            let _ = inflight.remove(digest);
        }
    }
}

/// Final and staging paths for one digest.
struct Layout {
    tmp: PathBuf,
    blob: PathBuf,
    package: PathBuf,
    entry: PathBuf,
}

fn store_blocking(layout: &Layout, digest: &Sha256Digest, bytes: &[u8]) -> Result<CacheEntry, CacheError> {
    verify_bytes(bytes, digest)?;

    let staging = tempfile::Builder::new()
        .prefix(".fetch-")
        .tempdir_in(&layout.tmp)
        .map_err(CacheError::io(&layout.tmp))?;
    let staged_blob = staging.path().join("blob");
    let staged_package = staging.path().join("package");
    std::fs::write(&staged_blob, bytes).map_err(CacheError::io(&staged_blob))?;
    extract_archive(bytes, &staged_package).map_err(|message| CacheError::Extract {
        digest: digest.to_string(),
        message,
    })?;

    // The final directory is never removed here: another process may have
    // just promoted it. Packages are only renamed in whole, so an existing
    // directory holds the same verified content.
    promote(&staged_package, &layout.package)?;
    promote(&staged_blob, &layout.blob)?;

    let entry = CacheEntry {
        digest: digest.clone(),
        local_path: layout.package.clone(),
        fetched_at: Utc::now(),
        size_bytes: bytes.len() as u64,
    };
    let json = serde_json::to_vec_pretty(&entry).map_err(|e| CacheError::InvalidRecord {
        path: layout.entry.clone(),
        message: e.to_string(),
    })?;
    write_atomically(&layout.tmp, &layout.entry, &json)?;
    Ok(entry)
}

/// Renames `from` to `to`; an existing `to` means another writer won.
fn promote(from: &Path, to: &Path) -> Result<(), CacheError> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) if to.exists() => {
            tracing::debug!(path = %to.display(), "cache entry promoted concurrently");
            Ok(())
        }
        Err(e) => Err(CacheError::io(to)(e)),
    }
}

fn write_atomically(tmp_dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let mut file = tempfile::NamedTempFile::new_in(tmp_dir).map_err(CacheError::io(tmp_dir))?;
    file.write_all(bytes).map_err(CacheError::io(file.path()))?;
    let _ = file
        .persist(target)
        .map_err(|e| CacheError::io(target)(e.error))?;
    Ok(())
}

fn remove_file_if_present(path: &Path) -> Result<(), CacheError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(CacheError::io(path)(e)),
        _ => Ok(()),
    }
}

fn remove_dir_if_present(path: &Path) -> Result<(), CacheError> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(CacheError::io(path)(e)),
        _ => Ok(()),
    }
}

/// Unpacks a plain or gzip-compressed tar archive into `target`.
fn extract_archive(bytes: &[u8], target: &Path) -> Result<(), String> {
    std::fs::create_dir_all(target).map_err(|e| e.to_string())?;
    let result = if is_gzip(bytes) {
        tar::Archive::new(flate2::read::GzDecoder::new(bytes)).unpack(target)
    } else {
        tar::Archive::new(bytes).unpack(target)
    };
    result.map_err(|e| e.to_string())
}

/// Gzip streams start with the magic bytes `1f 8b`.
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0x1f, 0x8b])
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::registry::tests::package;

    fn sample() -> (Vec<u8>, Sha256Digest) {
        let bytes = package(&[
            ("devcontainer-feature.json", r#"{"id": "x"}"#),
            ("install.sh", "#!/bin/sh\necho hi\n"),
        ]);
        let digest = hash_bytes(&bytes);
        (bytes, digest)
    }

    #[tokio::test]
    async fn store_then_lookup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PackageCache::open(dir.path()).expect("open");
        let (bytes, digest) = sample();
        let size = bytes.len() as u64;

        assert!(cache.lookup(&digest).expect("lookup").is_none());
        let entry = cache.store(&digest, bytes).await.expect("store");
        assert_eq!(entry.size_bytes, size);
        assert!(entry.local_path.join("install.sh").is_file());
        assert_eq!(cache.lookup(&digest).expect("lookup"), Some(entry));
        assert_eq!(cache.list().expect("list").len(), 1);
    }

    #[tokio::test]
    async fn mismatched_bytes_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PackageCache::open(dir.path()).expect("open");
        let (_, digest) = sample();
        let err = cache.store(&digest, b"tampered".to_vec()).await.expect_err("corrupt");
        assert!(matches!(err, CacheError::Corrupt { .. }));
        assert!(cache.lookup(&digest).expect("lookup").is_none());
    }

    #[tokio::test]
    async fn corrupt_entry_forces_refetch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PackageCache::open(dir.path()).expect("open");
        let (bytes, digest) = sample();
        let _ = cache.store(&digest, bytes.clone()).await.expect("store");
        std::fs::write(cache.blob_path(&digest), b"bit rot").expect("corrupt");

        let fetches = AtomicUsize::new(0);
        let entry = cache
            .get_or_fetch(&digest, || {
                let _ = fetches.fetch_add(1, Ordering::SeqCst);
                let bytes = bytes.clone();
                async move { Ok::<_, String>(bytes) }
            })
            .await
            .expect("refetch");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(entry.digest, digest);
        assert_eq!(cache.close().evicted_corrupt, 1);
    }

    #[tokio::test]
    async fn corrupt_download_is_retried_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PackageCache::open(dir.path()).expect("open");
        let (bytes, digest) = sample();
        let fetches = AtomicUsize::new(0);
        let entry = cache
            .get_or_fetch(&digest, || {
                let first = fetches.fetch_add(1, Ordering::SeqCst) == 0;
                let bytes = if first { b"garbage".to_vec() } else { bytes.clone() };
                async move { Ok::<_, String>(bytes) }
            })
            .await
            .expect("second attempt succeeds");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(entry.digest, digest);

        let other = hash_bytes(b"other");
        let err = cache
            .get_or_fetch(&other, || async { Ok::<_, String>(b"never matches".to_vec()) })
            .await
            .expect_err("stays corrupt");
        assert!(matches!(err, FetchError::Cache(CacheError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = Arc::new(PackageCache::open(dir.path()).expect("open"));
        let (bytes, digest) = sample();
        let fetches = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let fetches = Arc::clone(&fetches);
            let bytes = bytes.clone();
            let digest = digest.clone();
            let _ = tasks.spawn(async move {
                cache
                    .get_or_fetch(&digest, || {
                        let _ = fetches.fetch_add(1, Ordering::SeqCst);
                        let bytes = bytes.clone();
                        async move { Ok::<_, String>(bytes) }
                    })
                    .await
                    .map(|e| e.digest)
            });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.expect("join").expect("fetch"), digest);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(cache.inflight.lock().expect("inflight").is_empty());
    }

    #[test]
    fn separate_instances_store_the_same_digest() {
        const WRITERS: usize = 8;
        let (bytes, digest) = sample();

        for _ in 0..50 {
            let dir = tempfile::tempdir().expect("tempdir");
            let barrier = std::sync::Barrier::new(WRITERS);
            let results: Vec<Result<CacheEntry, CacheError>> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..WRITERS)
                    .map(|_| {
                        scope.spawn(|| {
                            let cache = PackageCache::open(dir.path()).expect("open");
                            let rt = tokio::runtime::Builder::new_current_thread()
                                .enable_all()
                                .build()
                                .expect("runtime");
                            let _ = barrier.wait();
                            rt.block_on(cache.store(&digest, bytes.clone()))
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().expect("join")).collect()
            });

            for result in results {
                let entry = result.expect("every concurrent store succeeds");
                assert!(entry.local_path.join("install.sh").is_file());
            }
            let cache = PackageCache::open(dir.path()).expect("reopen");
            assert!(cache.lookup(&digest).expect("lookup").is_some());
        }
    }

    #[tokio::test]
    async fn evicting_leaves_no_package_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PackageCache::open(dir.path()).expect("open");
        let (bytes, digest) = sample();
        let _ = cache.store(&digest, bytes.clone()).await.expect("store");

        cache.evict(&digest).expect("evict");
        assert!(!cache.package_path(&digest).exists());
        assert_eq!(std::fs::read_dir(dir.path().join(TMP_DIR)).expect("tmp").count(), 0);

        let entry = cache.store(&digest, bytes).await.expect("store again");
        assert!(entry.local_path.join("install.sh").is_file());
    }

    #[tokio::test]
    async fn leftover_package_without_record_is_reused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PackageCache::open(dir.path()).expect("open");
        let (bytes, digest) = sample();
        let _ = cache.store(&digest, bytes.clone()).await.expect("store");
        std::fs::remove_file(cache.entry_path(&digest)).expect("drop record");

        assert!(cache.lookup(&digest).expect("lookup").is_none());
        let entry = cache.store(&digest, bytes).await.expect("store again");
        assert!(entry.local_path.join("install.sh").is_file());
        assert_eq!(cache.lookup(&digest).expect("lookup"), Some(entry));
    }

    #[tokio::test]
    async fn fetch_failure_is_reported_as_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PackageCache::open(dir.path()).expect("open");
        let (_, digest) = sample();
        let err = cache
            .get_or_fetch(&digest, || async { Err::<Vec<u8>, _>("offline".to_string()) })
            .await
            .expect_err("offline");
        assert!(matches!(err, FetchError::Source(ref m) if m == "offline"));
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PackageCache::open(dir.path()).expect("open");
        let (bytes, digest) = sample();
        let _ = cache.store(&digest, bytes).await.expect("store");
        cache
            .record_ref(&RefRecord {
                identifier: "ghcr.io/acme/x".into(),
                constraint: "1".into(),
                reference: "1.0.0".into(),
                digest: digest.clone(),
                manifest: r#"{"id": "x"}"#.into(),
                recorded_at: Utc::now(),
            })
            .expect("record");
        assert!(cache.lookup_ref("ghcr.io/acme/x", "1").is_some());
        assert!(cache.lookup_ref("ghcr.io/acme/x", "2").is_none());

        assert_eq!(cache.clear().expect("clear"), 1);
        assert!(cache.list().expect("list").is_empty());
        assert!(cache.lookup_ref("ghcr.io/acme/x", "1").is_none());
        assert!(!cache.package_path(&digest).exists());
    }

    #[test]
    fn extracts_plain_tar() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut builder = tar::Builder::new(Vec::new());
        let data = b"plain";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "f.txt", &data[..]).expect("append");
        let bytes = builder.into_inner().expect("finish");
        assert!(!is_gzip(&bytes));
        extract_archive(&bytes, &dir.path().join("out")).expect("extract");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/f.txt")).expect("read"),
            "plain"
        );
    }
}
