use std::error::Error;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// An error that happens when retrieving a remote file through the cache.
///
/// This covers both failures of the [`Downloader`](crate::download::Downloader) itself, and
/// failures of the cache copying its own backing file to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetrievalError {
    /// The file was not found at the remote source.
    #[error("not found")]
    NotFound,
    /// The file could not be fetched from the remote source due to missing permissions.
    ///
    /// The attached string contains the remote source's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The file could not be fetched from the remote source due to a timeout.
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    /// The file could not be fetched from the remote source due to another problem,
    /// like connection loss, DNS resolution, or a 5xx server response.
    #[error("download failed: {0}")]
    DownloadError(String),
    /// The remote id cannot be mapped to a path inside of the cache.
    #[error("invalid remote id: {0:?}")]
    InvalidId(String),
    /// Reading, writing or copying a local file failed.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<io::Error> for RetrievalError {
    #[track_caller]
    fn from(err: io::Error) -> Self {
        let dynerr: &dyn Error = &err; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr, "i/o error during retrieval");
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for RetrievalError {
    fn from(error: reqwest::Error) -> Self {
        Self::download_error(&error)
    }
}

impl RetrievalError {
    /// Creates a [`DownloadError`](Self::DownloadError) from the innermost cause of `error`.
    pub(crate) fn download_error(mut error: &dyn Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        let mut error_string = error.to_string();

        // Special-case a few error strings
        if error_string.contains("certificate verify failed") {
            error_string = "certificate verify failed".to_string();
        }

        if error_string.contains("SSL routines") {
            error_string = "SSL error".to_string();
        }

        Self::DownloadError(error_string)
    }

    /// A short, stable name for this error kind, used as a metrics tag.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::NotFound => "notfound",
            Self::PermissionDenied(_) => "permissiondenied",
            Self::Timeout(_) => "timeout",
            Self::DownloadError(_) => "downloaderror",
            Self::InvalidId(_) => "invalidid",
            Self::Io(_) => "io",
        }
    }
}
