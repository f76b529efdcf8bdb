//! Downloaders which fetch remote files into local destination files.
//!
//! The [`FileDownloadCache`](crate::caching::FileDownloadCache) is agnostic to where files come
//! from. It is handed a [`Downloader`] on each fetch, and only invokes it when a file is not
//! already cached.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;

use crate::config::{Config, SourceConfig};
use crate::error::RetrievalError;

mod filesystem;
mod http;

pub use self::filesystem::FilesystemDownloader;
pub use self::http::HttpDownloader;

/// The `User-Agent` sent with HTTP requests.
pub const USER_AGENT: &str = concat!("download-cache/", env!("CARGO_PKG_VERSION"));

/// The capability to fetch remote content into a local file.
///
/// Implementations write the full content addressed by `remote_id` into `destination`, creating
/// or truncating it. Parent directories of `destination` already exist. In case of an error the
/// contents of `destination` are considered garbage.
pub trait Downloader: Send + Sync {
    fn download_file<'a>(
        &'a self,
        remote_id: &'a str,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<(), RetrievalError>>;
}

impl<D: Downloader + ?Sized> Downloader for &D {
    fn download_file<'a>(
        &'a self,
        remote_id: &'a str,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<(), RetrievalError>> {
        (**self).download_file(remote_id, destination)
    }
}

impl<D: Downloader + ?Sized> Downloader for Arc<D> {
    fn download_file<'a>(
        &'a self,
        remote_id: &'a str,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<(), RetrievalError>> {
        (**self).download_file(remote_id, destination)
    }
}

/// A [`Downloader`] for any of the configurable [`SourceConfig`]s.
#[derive(Debug)]
pub enum SourceDownloader {
    Filesystem(FilesystemDownloader),
    Http(HttpDownloader),
}

impl SourceDownloader {
    /// Creates the downloader for the configured source, if there is one.
    pub fn from_config(config: &Config) -> Result<Option<Self>, RetrievalError> {
        let downloader = match &config.source {
            None => return Ok(None),
            Some(SourceConfig::Filesystem { path }) => {
                Self::Filesystem(FilesystemDownloader::new(path.clone()))
            }
            Some(SourceConfig::Http { url }) => {
                Self::Http(HttpDownloader::from_config(url.clone(), config.timeouts)?)
            }
        };
        Ok(Some(downloader))
    }

    fn source_name(&self) -> &'static str {
        match self {
            Self::Filesystem(_) => "filesystem",
            Self::Http(_) => "http",
        }
    }

    /// Dispatches downloading of the given file to the appropriate source.
    async fn dispatch_download(
        &self,
        remote_id: &str,
        destination: &Path,
    ) -> Result<(), RetrievalError> {
        let start = Instant::now();
        let result = match self {
            Self::Filesystem(fs) => fs.download_source(remote_id, destination).await,
            Self::Http(http) => http.download_source(remote_id, destination).await,
        };

        let status = match &result {
            Ok(()) => "success",
            Err(e) => e.as_tag(),
        };
        metric!(
            timer("download.duration") = start.elapsed(),
            "source" => self.source_name(),
            "status" => status,
        );

        if let Err(err) = &result {
            tracing::debug!("File `{}` fetching failed: {}", remote_id, err);
        } else {
            tracing::debug!("File `{}` fetched successfully", remote_id);
        }

        result
    }
}

impl Downloader for SourceDownloader {
    fn download_file<'a>(
        &'a self,
        remote_id: &'a str,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<(), RetrievalError>> {
        Box::pin(self.dispatch_download(remote_id, destination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_source_configured() {
        let config = Config::default();
        assert!(SourceDownloader::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_source_from_config() {
        let config = Config {
            source: Some(SourceConfig::Filesystem {
                path: "/mnt/mirror".into(),
            }),
            ..Default::default()
        };
        let downloader = SourceDownloader::from_config(&config).unwrap().unwrap();
        assert_eq!(downloader.source_name(), "filesystem");
    }
}
