use std::sync::Arc;
use std::time::Duration;

use download_cache::RetrievalError;
use download_cache::download::HttpDownloader;

use crate::{Server, setup_cache, write_file};

#[tokio::test]
async fn test_fetch_over_http() {
    let (cache, _cache_dir) = setup_cache(|_| {});
    let files = download_cache_test::tempdir();
    write_file(files.path(), "builds/1/artifact.zip", b"zipzipzip");
    let server = Server::serve_dir(files.path());
    let downloader = HttpDownloader::from_config(server.url("/"), Default::default()).unwrap();

    for _ in 0..3 {
        let file = cache
            .fetch_remote_file(&downloader, "builds/1/artifact.zip")
            .await
            .unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), b"zipzipzip");
    }

    assert_eq!(server.accesses(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetches_over_http() {
    let (cache, _cache_dir) = setup_cache(|_| {});
    let cache = Arc::new(cache);
    let files = download_cache_test::tempdir();
    write_file(files.path(), "big.bin", &[7; 64 * 1024]);
    let server = Server::serve_dir(files.path());
    let downloader =
        Arc::new(HttpDownloader::from_config(server.url("/"), Default::default()).unwrap());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let downloader = Arc::clone(&downloader);
            tokio::spawn(async move { cache.fetch_remote_file(&downloader, "big.bin").await })
        })
        .collect();

    for task in tasks {
        let file = task.await.unwrap().unwrap();
        assert_eq!(std::fs::metadata(file.path()).unwrap().len(), 64 * 1024);
    }

    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_http_errors() {
    let (cache, cache_dir) = setup_cache(|_| {});
    let files = download_cache_test::tempdir();
    let server = Server::serve_dir(files.path());
    let timeouts = download_cache::config::DownloadTimeouts {
        max_download: Duration::from_millis(200),
        ..Default::default()
    };
    let downloader = HttpDownloader::from_config(server.url("/"), timeouts).unwrap();

    // Run twice to make sure failures are never cached.
    for _ in 0..2 {
        let result = cache.fetch_remote_file(&downloader, "missing.bin").await;
        assert_eq!(result.unwrap_err(), RetrievalError::NotFound);

        let result = cache.fetch_remote_file(&downloader, "private/x.bin").await;
        assert_eq!(
            result.unwrap_err(),
            RetrievalError::PermissionDenied("403 Forbidden".into())
        );

        let result = cache.fetch_remote_file(&downloader, "error/x.bin").await;
        assert_eq!(
            result.unwrap_err(),
            RetrievalError::DownloadError("500 Internal Server Error".into())
        );

        let result = cache.fetch_remote_file(&downloader, "delay/x.bin").await;
        assert_eq!(
            result.unwrap_err(),
            RetrievalError::Timeout(Duration::from_millis(200))
        );
    }

    assert_eq!(server.accesses(), 8);
    assert_eq!(cache.stats().entries, 0);
    assert!(!cache_dir.path().join("cache/delay/x.bin").exists());
}
