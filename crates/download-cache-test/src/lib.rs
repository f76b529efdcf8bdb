//! Helpers for testing the download cache and its downloaders.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. The directory is deleted as soon as the handle is dropped.
//!
//!  - When using a [`Server`], make sure that the server is held until all requests to
//!    the server have been made. It stops serving when dropped.

use std::fs;
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use filetime::FileTime;
use reqwest::Url;
use tower_http::services::ServeDir;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the download cache crates and mutes
///    all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("download_cache=trace,dlcache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`into_path`](TempDir::into_path) is called. Use it as a guard to automatically clean up after
/// tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Writes `contents` to `root/relative`, creating parent directories as needed.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn write_file(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// Like [`write_file`], but also sets the modification time to `age` in the past.
pub fn write_file_aged(root: &Path, relative: &str, contents: &[u8], age: Duration) {
    write_file(root, relative, contents);
    set_age(&root.join(relative), age);
}

/// Sets the modification time of `path` to `age` in the past.
pub fn set_age(path: &Path, age: Duration) {
    let mtime = SystemTime::now() - age;
    filetime::set_file_mtime(path, FileTime::from_system_time(mtime)).unwrap();
}

/// A test server that binds to a random port and serves files out of a directory.
///
/// Besides the files, the server has a couple of special routes:
///
///  - `/private/*`: Always responds with `403 Forbidden`.
///  - `/delay/*`: Responds with `200 OK` after one second.
///  - `/error/*`: Always responds with `500 Internal Server Error`.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    accesses: Arc<AtomicUsize>,
}

async fn count_accesses(
    State(accesses): State<Arc<AtomicUsize>>,
    request: Request,
    next: Next,
) -> Response {
    accesses.fetch_add(1, Ordering::SeqCst);
    next.run(request).await
}

impl Server {
    /// Creates a new server for the contents of `dir`.
    pub fn serve_dir(dir: &Path) -> Self {
        let accesses = Arc::new(AtomicUsize::new(0));

        let router = Router::new()
            .route("/private/*path", get(|| async { StatusCode::FORBIDDEN }))
            .route(
                "/error/*path",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .route(
                "/delay/*path",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    "finally"
                }),
            )
            .fallback_service(ServeDir::new(dir))
            .layer(middleware::from_fn_with_state(
                accesses.clone(),
                count_accesses,
            ));

        Self::with_router(router, accesses)
    }

    fn with_router(router: Router, accesses: Arc<AtomicUsize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            handle,
            socket,
            accesses,
        }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the number of requests this server has received.
    pub fn accesses(&self) -> usize {
        self.accesses.load(Ordering::SeqCst)
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses the loopback address the server is bound to as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://{}/{}", self.addr(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
