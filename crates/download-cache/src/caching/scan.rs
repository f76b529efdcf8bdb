use std::path::Path;

use walkdir::WalkDir;

use super::index::CacheEntry;
use super::paths::remote_id_for_path;

/// Collects all regular files below `root` as cache entries.
///
/// The remote id of each file is its path relative to `root`, joined with `/`. Files that
/// vanish during the scan, or whose metadata or name cannot be read, are skipped.
pub(super) fn scan_cache_dir(root: &Path) -> Vec<(String, CacheEntry)> {
    let mut entries = Vec::new();

    for dir_entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let dir_entry = match dir_entry {
            Ok(dir_entry) => dir_entry,
            Err(e) => {
                tracing::warn!("Failed to scan cache directory: {}", e);
                continue;
            }
        };
        if !dir_entry.file_type().is_file() {
            continue;
        }

        let path = dir_entry.path();
        let Some(remote_id) = remote_id_for_path(root, path) else {
            tracing::warn!("Skipping unsupported file name `{}`", path.display());
            continue;
        };

        let metadata = match dir_entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Failed to read metadata of `{}`: {}", path.display(), e);
                continue;
            }
        };
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!("Failed to read mtime of `{}`: {}", path.display(), e);
                continue;
            }
        };

        tracing::trace!("Found cached file `{}`", remote_id);
        entries.push((
            remote_id,
            CacheEntry {
                path: path.to_path_buf(),
                size: metadata.len(),
                modified,
            },
        ));
    }

    entries
}
