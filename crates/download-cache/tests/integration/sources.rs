use download_cache::config::{Config, SourceConfig};
use download_cache::download::SourceDownloader;

use crate::{Server, setup_cache, write_file};

#[tokio::test]
async fn test_configured_sources() {
    let files = download_cache_test::tempdir();
    write_file(files.path(), "hello.txt", b"hello world\n");
    let server = Server::serve_dir(files.path());

    let sources = [
        SourceConfig::Filesystem {
            path: files.path().to_owned(),
        },
        SourceConfig::Http {
            url: server.url("/"),
        },
    ];

    for source in sources {
        let config = Config {
            source: Some(source),
            ..Default::default()
        };
        let downloader = SourceDownloader::from_config(&config).unwrap().unwrap();
        let (cache, _cache_dir) = setup_cache(|_| {});

        let file = cache
            .fetch_remote_file(&downloader, "hello.txt")
            .await
            .unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), b"hello world\n");
    }

    assert_eq!(server.accesses(), 1);
}

#[test]
fn test_no_source() {
    let downloader = SourceDownloader::from_config(&Config::default()).unwrap();
    assert!(downloader.is_none());
}
