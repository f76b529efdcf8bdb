//! Support to download from HTTP sources.

use std::path::Path;

use futures::StreamExt;
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode, header};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::caching::normalize_remote_id;
use crate::config::DownloadTimeouts;
use crate::error::RetrievalError;

use super::{Downloader, USER_AGENT};

/// Downloader implementation that fetches remote ids relative to a base URL.
#[derive(Debug)]
pub struct HttpDownloader {
    client: Client,
    base_url: Url,
    timeouts: DownloadTimeouts,
}

impl HttpDownloader {
    pub fn new(client: Client, base_url: Url, timeouts: DownloadTimeouts) -> Self {
        Self {
            client,
            base_url,
            timeouts,
        }
    }

    /// Creates a downloader with its own client, configured with the given timeouts.
    pub fn from_config(base_url: Url, timeouts: DownloadTimeouts) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::new(client, base_url, timeouts))
    }

    /// Resolves `remote_id` against the base URL.
    ///
    /// The base URL is treated as a directory, even without a trailing slash.
    fn url_for(&self, remote_id: &str) -> Result<Url, RetrievalError> {
        let remote_id = normalize_remote_id(remote_id)?;
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RetrievalError::InvalidId(remote_id.clone()))?
            .pop_if_empty()
            .extend(remote_id.split('/'));
        Ok(url)
    }

    /// Downloads the file from the HTTP server into `destination`.
    pub async fn download_source(
        &self,
        remote_id: &str,
        destination: &Path,
    ) -> Result<(), RetrievalError> {
        let download_url = self.url_for(remote_id)?;
        tracing::debug!("Fetching file from `{}`", download_url);

        let timeout = self.timeouts.max_download;
        let download = self.download_url(download_url, destination);
        match tokio::time::timeout(timeout, download).await {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::Timeout(timeout)),
        }
    }

    async fn download_url(&self, url: Url, destination: &Path) -> Result<(), RetrievalError> {
        let response = self
            .client
            .get(url.clone())
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Unexpected status code from `{}`: {}", url, status);
            return Err(match status {
                StatusCode::NOT_FOUND => RetrievalError::NotFound,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    RetrievalError::PermissionDenied(status.to_string())
                }
                _ => RetrievalError::DownloadError(status.to_string()),
            });
        }

        let mut file = File::create(destination).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        Ok(())
    }
}

impl Downloader for HttpDownloader {
    fn download_file<'a>(
        &'a self,
        remote_id: &'a str,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<(), RetrievalError>> {
        Box::pin(self.download_source(remote_id, destination))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn downloader(base_url: Url) -> HttpDownloader {
        HttpDownloader::from_config(base_url, Default::default()).unwrap()
    }

    #[test]
    fn test_url_for() {
        let without_slash = downloader("https://example.com/builds".parse().unwrap());
        assert_eq!(
            without_slash.url_for("1234/device.img").unwrap().as_str(),
            "https://example.com/builds/1234/device.img"
        );

        let with_slash = downloader("https://example.com/builds/".parse().unwrap());
        assert_eq!(
            with_slash.url_for("/1234//device img.zip").unwrap().as_str(),
            "https://example.com/builds/1234/device%20img.zip"
        );
        assert!(with_slash.url_for("../etc").is_err());
    }

    #[tokio::test]
    async fn test_download_source() {
        download_cache_test::setup();

        let files = download_cache_test::tempdir();
        download_cache_test::write_file(files.path(), "hello.txt", b"hello world\n");
        let server = download_cache_test::Server::serve_dir(files.path());

        let tmpfile = tempfile::NamedTempFile::new().unwrap();
        downloader(server.url("/"))
            .download_source("hello.txt", tmpfile.path())
            .await
            .unwrap();

        let content = std::fs::read_to_string(tmpfile.path()).unwrap();
        assert_eq!(content, "hello world\n");
        assert_eq!(server.accesses(), 1);
    }

    #[tokio::test]
    async fn test_download_source_missing() {
        download_cache_test::setup();

        let files = download_cache_test::tempdir();
        let server = download_cache_test::Server::serve_dir(files.path());

        let tmpfile = tempfile::NamedTempFile::new().unwrap();
        let result = downloader(server.url("/"))
            .download_source("i-do-not-exist", tmpfile.path())
            .await;

        assert_eq!(result, Err(RetrievalError::NotFound));
    }

    #[tokio::test]
    async fn test_download_source_forbidden() {
        download_cache_test::setup();

        let files = download_cache_test::tempdir();
        let server = download_cache_test::Server::serve_dir(files.path());

        let tmpfile = tempfile::NamedTempFile::new().unwrap();
        let result = downloader(server.url("/"))
            .download_source("private/secret.txt", tmpfile.path())
            .await;

        assert_eq!(
            result,
            Err(RetrievalError::PermissionDenied("403 Forbidden".into()))
        );
    }

    #[tokio::test]
    async fn test_download_source_timeout() {
        download_cache_test::setup();

        let files = download_cache_test::tempdir();
        let server = download_cache_test::Server::serve_dir(files.path());

        let timeouts = DownloadTimeouts {
            max_download: Duration::from_millis(100),
            ..Default::default()
        };
        let downloader = HttpDownloader::from_config(server.url("/"), timeouts).unwrap();

        let tmpfile = tempfile::NamedTempFile::new().unwrap();
        let result = downloader
            .download_source("delay/slow.bin", tmpfile.path())
            .await;

        assert_eq!(
            result,
            Err(RetrievalError::Timeout(Duration::from_millis(100)))
        );
    }
}
