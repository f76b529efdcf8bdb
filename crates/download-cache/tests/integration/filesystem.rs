use std::fs;

use download_cache::RetrievalError;
use download_cache::download::FilesystemDownloader;

use crate::{setup_cache, write_file};

#[tokio::test]
async fn test_fetch_from_directory() {
    let (cache, cache_dir) = setup_cache(|_| {});
    let mirror = download_cache_test::tempdir();
    write_file(mirror.path(), "builds/1234/device.img", b"image");
    let downloader = FilesystemDownloader::new(mirror.path());

    let file = cache
        .fetch_remote_file(&downloader, "builds/1234/device.img")
        .await
        .unwrap();

    assert_eq!(fs::read(file.path()).unwrap(), b"image");
    assert!(file.path().starts_with(cache_dir.path().join("tmp")));
    assert_eq!(
        cache.get_cached_file("builds/1234/device.img"),
        Some(cache_dir.path().join("cache/builds/1234/device.img"))
    );

    // Once cached, the source is no longer consulted.
    fs::remove_file(mirror.path().join("builds/1234/device.img")).unwrap();
    let file = cache
        .fetch_remote_file(&downloader, "builds/1234/device.img")
        .await
        .unwrap();
    assert_eq!(fs::read(file.path()).unwrap(), b"image");
}

#[tokio::test]
async fn test_missing_file() {
    let (cache, cache_dir) = setup_cache(|_| {});
    let mirror = download_cache_test::tempdir();
    let downloader = FilesystemDownloader::new(mirror.path());

    let result = cache.fetch_remote_file(&downloader, "nope/missing.bin").await;

    assert_eq!(result.unwrap_err(), RetrievalError::NotFound);
    assert_eq!(cache.get_cached_file("nope/missing.bin"), None);
    assert!(!cache_dir.path().join("cache/nope/missing.bin").exists());
}

#[tokio::test]
async fn test_eviction_across_fetches() {
    let (cache, _cache_dir) = setup_cache(|config| config.cache.max_cache_size = 10);
    let mirror = download_cache_test::tempdir();
    write_file(mirror.path(), "a", b"aaaaaa");
    write_file(mirror.path(), "b", b"bbbbbb");
    write_file(mirror.path(), "c", b"cccccc");
    let downloader = FilesystemDownloader::new(mirror.path());

    for remote_id in ["a", "b", "c"] {
        cache.fetch_remote_file(&downloader, remote_id).await.unwrap();
    }

    let ids: Vec<_> = cache.entries().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, ["c"]);
    assert_eq!(cache.stats().total_size, 6);
}
