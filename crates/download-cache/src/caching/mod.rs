//! # The download cache
//!
//! Build and test tooling fetches the same large artifacts over and over again. The
//! [`FileDownloadCache`] keeps local copies of those artifacts on disk, keyed by their remote id,
//! so that each one only has to be downloaded once.
//!
//! ## Layout
//!
//! Each remote id doubles as the relative path of its backing file below the cache root. A remote
//! id like `builds/1234/device.img` is stored at `<root>/builds/1234/device.img`. Remote ids are
//! normalized to use `/` as separator, and ids that would escape the cache root are rejected.
//!
//! The file system is the source of truth. There is no separate metadata file: when a cache is
//! opened, the root directory is scanned recursively and every regular file found is registered
//! under its relative path.
//!
//! ## Fetching
//!
//! [`FileDownloadCache::fetch_remote_file`] takes a [`Downloader`](crate::download::Downloader)
//! and a remote id. While holding a lock for that remote id, it either copies the existing backing
//! file, or has the downloader write a new backing file and copies that. Callers always receive a
//! fresh temporary copy. If a backing file turns out to be unreadable, it is purged and downloaded
//! again.
//!
//! ## Eviction
//!
//! The cache is bounded by [`FileDownloadCache::max_cache_size`]. Whenever a file was added (and
//! when opening the cache) entries are evicted oldest first until the total size is within the
//! budget. Age is the modification time of the backing file, ties are broken by the remote id.
//! Reading a file through the cache does *not* refresh its age. The most recent file is never
//! evicted, even when it alone exceeds the budget.
//!
//! ### Metrics
//!
//! - `caches.access`: All fetches.
//! - `caches.file.hit`: Fetches served from an existing backing file.
//! - `caches.file.stale`: Backing files which could not be read and were purged.
//! - `caches.download`: Downloads, tagged with a `status`.
//! - `caches.download.duration`: Time spent in the downloader.
//! - `caches.file.size`: Size of freshly downloaded files.
//! - `caches.size.files` / `caches.size.bytes`: Gauges of the cache contents after eviction.
//! - `caches.size.files_removed` / `caches.size.bytes_removed`: What eviction removed.

mod fs;
mod index;
mod locks;
mod paths;
mod scan;

pub use fs::{CacheStats, EvictionStats, FileDownloadCache};
pub use index::CacheEntry;
pub use paths::{backing_path, normalize_remote_id};
