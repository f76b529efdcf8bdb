use download_cache::FileDownloadCache;
use download_cache::config::Config;
use download_cache_test as test_utils;

pub use test_utils::{Server, write_file};

/// Setup tests and create a cache.
///
/// This function returns a tuple containing the cache to test, and a temporary directory
/// holding the cache root. The directory is cleaned up when the [`TempDir`](test_utils::TempDir)
/// instance is dropped. Keep it as guard until the test has finished.
///
/// The `update_config` closure can modify the default configuration before the cache is opened.
pub fn setup_cache(
    update_config: impl FnOnce(&mut Config),
) -> (FileDownloadCache, test_utils::TempDir) {
    test_utils::setup();

    let cache_dir = test_utils::tempdir();

    let mut config = Config::default();
    config.cache.root = cache_dir.path().join("cache");
    config.cache.tmp_dir = Some(cache_dir.path().join("tmp"));
    update_config(&mut config);

    let cache = FileDownloadCache::from_config(&config.cache).unwrap();
    (cache, cache_dir)
}
