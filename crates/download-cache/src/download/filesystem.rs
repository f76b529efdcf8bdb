//! Support to download from the local filesystem.
//!
//! It allows a local directory, for example a network mount, to act as the remote source.

use std::io;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::caching::{backing_path, normalize_remote_id};
use crate::error::RetrievalError;

use super::Downloader;

/// Downloader implementation that copies files out of a local directory.
#[derive(Debug)]
pub struct FilesystemDownloader {
    root: PathBuf,
}

impl FilesystemDownloader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Copies `<root>/<remote_id>` to `destination`.
    pub async fn download_source(
        &self,
        remote_id: &str,
        destination: &Path,
    ) -> Result<(), RetrievalError> {
        let path = backing_path(&self.root, &normalize_remote_id(remote_id)?);
        tracing::debug!("Fetching file from {:?}", path);

        let mut file = File::open(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => RetrievalError::NotFound,
            io::ErrorKind::PermissionDenied => RetrievalError::PermissionDenied(e.to_string()),
            _ => e.into(),
        })?;
        if !file.metadata().await?.is_file() {
            return Err(RetrievalError::NotFound);
        }

        let mut destination = File::create(destination).await?;
        tokio::io::copy(&mut file, &mut destination).await?;
        destination.flush().await?;
        Ok(())
    }
}

impl Downloader for FilesystemDownloader {
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
    use super::*;

    #[tokio::test]
    async fn test_download_source() {
        download_cache_test::setup();

        let source = download_cache_test::tempdir();
        download_cache_test::write_file(source.path(), "builds/1/hello.txt", b"hello world\n");

        let tmpfile = tempfile::NamedTempFile::new().unwrap();
        let downloader = FilesystemDownloader::new(source.path());
        downloader
            .download_source("builds/1/hello.txt", tmpfile.path())
            .await
            .unwrap();

        let content = std::fs::read_to_string(tmpfile.path()).unwrap();
        assert_eq!(content, "hello world\n");
    }

    #[tokio::test]
    async fn test_download_source_missing() {
        download_cache_test::setup();

        let source = download_cache_test::tempdir();
        std::fs::create_dir(source.path().join("a-directory")).unwrap();

        let tmpfile = tempfile::NamedTempFile::new().unwrap();
        let downloader = FilesystemDownloader::new(source.path());

        let result = downloader
            .download_source("i-do-not-exist", tmpfile.path())
            .await;
        assert_eq!(result, Err(RetrievalError::NotFound));

        let result = downloader
            .download_source("a-directory", tmpfile.path())
            .await;
        assert_eq!(result, Err(RetrievalError::NotFound));
    }

    #[tokio::test]
    async fn test_download_source_escape() {
        let source = download_cache_test::tempdir();
        let tmpfile = tempfile::NamedTempFile::new().unwrap();
        let downloader = FilesystemDownloader::new(source.path().join("inner"));

        let result = downloader
            .download_source("../secret", tmpfile.path())
            .await;
        assert_eq!(result, Err(RetrievalError::InvalidId("../secret".into())));
    }
}
