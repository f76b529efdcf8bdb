//! Mapping between remote ids and paths inside of the cache root.

use std::path::{Component, Path, PathBuf};

use crate::error::RetrievalError;

/// Brings a remote id into its canonical form.
///
/// Both `/` and `\` are accepted as separators, the canonical form uses `/`. Empty segments are
/// dropped, so `"/foo//bar"` and `"foo\\bar"` both become `"foo/bar"`. Ids that would escape the
/// cache root, or that have no segments at all, are rejected.
pub fn normalize_remote_id(remote_id: &str) -> Result<String, RetrievalError> {
    let mut segments = Vec::new();
    for segment in remote_id.split(['/', '\\']) {
        match segment {
            "" => continue,
            "." | ".." => return Err(RetrievalError::InvalidId(remote_id.to_owned())),
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(RetrievalError::InvalidId(remote_id.to_owned()));
    }
    Ok(segments.join("/"))
}

/// Returns the path of the backing file for an already normalized remote id.
pub fn backing_path(root: &Path, remote_id: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    path.extend(remote_id.split('/'));
    path
}

/// Derives the canonical remote id for a file found below `root`.
///
/// Returns `None` if `path` is not below `root`, or if any of its components is not valid UTF-8
/// or contains a `\`. Such files could never be looked up, as `\` is a separator in remote ids.
pub fn remote_id_for_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments = relative
        .components()
        .map(|component| match component {
            Component::Normal(segment) => segment.to_str().filter(|s| !s.contains('\\')),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;

    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}
