use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tempfile::NamedTempFile;

use crate::config::CacheConfig;
use crate::download::Downloader;
use crate::error::RetrievalError;

use super::index::{CacheEntry, CacheIndex};
use super::locks::KeyLocks;
use super::paths::{backing_path, normalize_remote_id};
use super::scan::scan_cache_dir;

/// A size-bounded cache of remote files on the local file system.
///
/// Every remote id maps to exactly one backing file at `<root>/<remote_id>`. Callers never get
/// to see the backing files. [`fetch_remote_file`](Self::fetch_remote_file) hands out a fresh
/// copy instead, which the caller is free to move or delete.
///
/// Two kinds of locks are involved:
///
///  - A short-lived lock around the in-memory index, which is never held while waiting on I/O
///    of a download or copy.
///  - One asynchronous lock per remote id, which is held for the whole duration of a fetch. This
///    makes sure a remote file is only downloaded once, no matter how many callers ask for it
///    concurrently, while fetches of different remote ids run in parallel.
#[derive(Debug)]
pub struct FileDownloadCache {
    /// Directory holding all backing files.
    root: PathBuf,

    /// Directory to create caller copies in, the system temp directory if unset.
    tmp_dir: Option<PathBuf>,

    /// The eviction budget in bytes.
    max_cache_size: AtomicU64,

    /// All known backing files.
    index: Mutex<CacheIndex>,

    /// Serializes fetches of the same remote id.
    locks: KeyLocks,
}

/// Totals of a [`FileDownloadCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached files.
    pub entries: usize,
    /// Size of all cached files in bytes.
    pub total_size: u64,
    /// The eviction budget in bytes.
    pub max_cache_size: u64,
}

/// What a single eviction run removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionStats {
    pub removed_files: usize,
    pub removed_bytes: u64,
    /// Files that were selected for eviction but could not be deleted.
    pub failed_files: usize,
    /// Files that were selected for eviction but skipped, as a fetch was using them.
    pub busy_files: usize,
}

impl FileDownloadCache {
    /// Opens the cache at `root`, creating the directory if needed.
    ///
    /// All files already present below `root` are indexed. If they exceed `max_cache_size`,
    /// the oldest ones are evicted right away.
    pub fn new(root: impl Into<PathBuf>, max_cache_size: u64) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let mut index = CacheIndex::default();
        for (remote_id, entry) in scan_cache_dir(&root) {
            index.insert(remote_id, entry);
        }
        tracing::info!(
            "Indexed {} files totaling {} bytes in `{}`",
            index.len(),
            index.total_size(),
            root.display()
        );

        let cache = Self {
            root,
            tmp_dir: None,
            max_cache_size: AtomicU64::new(max_cache_size),
            index: Mutex::new(index),
            locks: KeyLocks::default(),
        };
        cache.evict_protecting(None);

        Ok(cache)
    }

    /// Opens the cache described by `config`.
    pub fn from_config(config: &CacheConfig) -> io::Result<Self> {
        let cache = Self::new(&config.root, config.max_cache_size)?;
        Ok(match config.tmp_dir {
            Some(ref tmp_dir) => cache.with_tmp_dir(tmp_dir),
            None => cache,
        })
    }

    /// Creates the copies handed out to callers in `tmp_dir`.
    ///
    /// Placing this on the same file system as the caller's final destination allows callers to
    /// cheaply persist the returned files.
    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = Some(tmp_dir.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_cache_size(&self) -> u64 {
        self.max_cache_size.load(Ordering::Relaxed)
    }

    /// Changes the eviction budget.
    ///
    /// This does not evict anything by itself. The new budget is applied by the next fetch that
    /// inserts a file, or by an explicit call to [`evict`](Self::evict).
    pub fn set_max_cache_size(&self, max_cache_size: u64) {
        self.max_cache_size.store(max_cache_size, Ordering::Relaxed);
    }

    fn index(&self) -> MutexGuard<'_, CacheIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a local copy of the remote file, downloading it with `downloader` if needed.
    ///
    /// The returned file belongs to the caller and is deleted when dropped, unless it is
    /// persisted. Concurrent calls for the same `remote_id` result in at most one download.
    pub async fn fetch_remote_file<D>(
        &self,
        downloader: &D,
        remote_id: &str,
    ) -> Result<NamedTempFile, RetrievalError>
    where
        D: Downloader + ?Sized,
    {
        let remote_id = normalize_remote_id(remote_id)?;
        metric!(counter("caches.access") += 1);

        let _guard = self.locks.lock(&remote_id).await;

        let cached_path = self.index().get(&remote_id).map(|entry| entry.path.clone());
        if let Some(path) = cached_path {
            match self.copy_to_tempfile(&path).await {
                Ok(file) => {
                    tracing::trace!("Cache hit for `{}`", remote_id);
                    metric!(counter("caches.file.hit") += 1);
                    return Ok(file);
                }
                Err(e) => {
                    tracing::warn!(
                        "Cached file `{}` is unusable, downloading again: {}",
                        path.display(),
                        e
                    );
                    metric!(counter("caches.file.stale") += 1);
                    self.purge(&remote_id, &path);
                }
            }
        }

        self.download(downloader, &remote_id).await
    }

    /// Downloads `remote_id` into its backing file and registers it.
    ///
    /// The caller must hold the lock for `remote_id`.
    async fn download<D>(
        &self,
        downloader: &D,
        remote_id: &str,
    ) -> Result<NamedTempFile, RetrievalError>
    where
        D: Downloader + ?Sized,
    {
        let path = backing_path(&self.root, remote_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::debug!("Downloading `{}` into `{}`", remote_id, path.display());
        let start = Instant::now();
        let result = downloader.download_file(remote_id, &path).await;
        metric!(timer("caches.download.duration") = start.elapsed());

        if let Err(e) = result {
            metric!(counter("caches.download") += 1, "status" => e.as_tag());
            tracing::debug!("Download of `{}` failed: {}", remote_id, e);
            remove_file_if_exists(&path);
            return Err(e);
        }
        metric!(counter("caches.download") += 1, "status" => "success");

        // Copy out before registering, so eviction by a concurrent fetch cannot pull the file
        // away between registering and copying it.
        let registered = async {
            let metadata = tokio::fs::metadata(&path).await?;
            let file = self.copy_to_tempfile(&path).await?;
            let entry = CacheEntry {
                path: path.clone(),
                size: metadata.len(),
                modified: metadata.modified()?,
            };
            Ok::<_, io::Error>((file, entry))
        };
        let (file, entry) = match registered.await {
            Ok(registered) => registered,
            Err(e) => {
                remove_file_if_exists(&path);
                return Err(e.into());
            }
        };

        metric!(histogram("caches.file.size") = entry.size);
        self.index().insert(remote_id.to_owned(), entry);
        self.evict_protecting(Some(remote_id));

        Ok(file)
    }

    /// Copies `path` into a new temporary file.
    async fn copy_to_tempfile(&self, path: &Path) -> io::Result<NamedTempFile> {
        let temp_file = self.tempfile()?;
        tokio::fs::copy(path, temp_file.path()).await?;
        Ok(temp_file)
    }

    /// Creates a new temporary file for a caller copy.
    fn tempfile(&self) -> io::Result<NamedTempFile> {
        match self.tmp_dir {
            Some(ref path) => {
                fs::create_dir_all(path)?;
                tempfile::Builder::new().prefix("download").tempfile_in(path)
            }
            None => NamedTempFile::new(),
        }
    }

    /// Forgets about the backing file of `remote_id` and deletes it.
    fn purge(&self, remote_id: &str, path: &Path) {
        self.index().remove(remote_id);
        remove_file_if_exists(path);
    }

    /// Returns the backing file of `remote_id`, if it is cached.
    ///
    /// The returned file is owned by the cache and must not be modified.
    pub fn get_cached_file(&self, remote_id: &str) -> Option<PathBuf> {
        let remote_id = normalize_remote_id(remote_id).ok()?;
        self.index().get(&remote_id).map(|entry| entry.path.clone())
    }

    /// Returns the remote id that would be evicted next.
    pub fn get_oldest_entry(&self) -> Option<String> {
        self.index().oldest().map(ToOwned::to_owned)
    }

    /// Returns all cached entries, oldest first.
    pub fn entries(&self) -> Vec<(String, CacheEntry)> {
        self.index()
            .iter_oldest_first()
            .map(|(remote_id, entry)| (remote_id.to_owned(), entry.clone()))
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.index();
        CacheStats {
            entries: index.len(),
            total_size: index.total_size(),
            max_cache_size: self.max_cache_size(),
        }
    }

    /// Evicts the oldest files until the cache fits its budget.
    ///
    /// The most recent file is always kept, even if it alone exceeds the budget.
    pub fn evict(&self) -> EvictionStats {
        self.evict_protecting(None)
    }

    /// Like [`evict`](Self::evict), but never evicts the `protect`ed remote id.
    fn evict_protecting(&self, protect: Option<&str>) -> EvictionStats {
        let max_cache_size = self.max_cache_size();
        let victims = self.index().take_victims(max_cache_size, protect);

        let mut stats = EvictionStats::default();
        for (remote_id, entry) in victims {
            // A concurrent fetch may be reading or replacing this very file.
            let Some(_guard) = self.locks.try_lock(&remote_id) else {
                tracing::debug!("Not evicting `{}` which is in use", remote_id);
                self.restore(remote_id, entry);
                stats.busy_files += 1;
                continue;
            };

            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    tracing::debug!("Evicted `{}` ({} bytes)", remote_id, entry.size);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!("Evicted `{}` which was already gone", remote_id);
                }
                Err(e) => {
                    sentry::with_scope(
                        |scope| scope.set_extra("path", entry.path.display().to_string().into()),
                        || tracing::error!("Failed to evict cache file: {:?}", e),
                    );
                    stats.failed_files += 1;
                    self.restore(remote_id, entry);
                    continue;
                }
            }
            stats.removed_files += 1;
            stats.removed_bytes += entry.size;
        }

        let current = self.stats();
        metric!(gauge("caches.size.files") = current.entries as u64);
        metric!(gauge("caches.size.bytes") = current.total_size);
        if stats.removed_files > 0 {
            tracing::info!(
                "Evicted {} files totaling {} bytes, {} bytes remaining",
                stats.removed_files,
                stats.removed_bytes,
                current.total_size,
            );
            metric!(counter("caches.size.files_removed") += stats.removed_files as i64);
            metric!(counter("caches.size.bytes_removed") += stats.removed_bytes as i64);
        }

        stats
    }

    /// Puts an eviction victim back into the index, unless it has been replaced in the meantime.
    fn restore(&self, remote_id: String, entry: CacheEntry) {
        let mut index = self.index();
        if index.get(&remote_id).is_none() {
            index.insert(remote_id, entry);
        }
    }

    /// Deletes the cache directory with all its files and forgets about them.
    ///
    /// The directory is created again by the next fetch.
    pub fn empty(&self) -> io::Result<()> {
        let mut index = self.index();
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tracing::info!(
            "Emptied `{}`, removed {} files",
            self.root.display(),
            index.len()
        );
        index.clear();
        Ok(())
    }
}

/// Deletes a file, logging failures other than the file being gone already.
fn remove_file_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        tracing::warn!("Failed to remove `{}`: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use download_cache_test as test_utils;

    use super::*;

    #[tokio::test]
    async fn test_eviction_skips_files_in_use() {
        test_utils::setup();
        let dir = test_utils::tempdir();
        let root = dir.path().join("cache");
        test_utils::write_file_aged(&root, "A", b"aaaa", Duration::from_secs(20));
        test_utils::write_file_aged(&root, "B", b"bbbb", Duration::from_secs(10));
        let cache = FileDownloadCache::new(&root, 1024).unwrap();
        cache.set_max_cache_size(4);

        let guard = cache.locks.lock("A").await;
        let stats = cache.evict();
        assert_eq!(
            stats,
            EvictionStats {
                busy_files: 1,
                ..Default::default()
            }
        );
        assert!(root.join("A").exists());
        assert_eq!(cache.get_oldest_entry().as_deref(), Some("A"));
        assert_eq!(cache.stats().total_size, 8);

        drop(guard);
        let stats = cache.evict();
        assert_eq!(stats.removed_files, 1);
        assert!(!root.join("A").exists());
        assert_eq!(cache.get_cached_file("A"), None);
    }
}
