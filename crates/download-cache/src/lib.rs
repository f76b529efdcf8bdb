//! A disk-backed, size-bounded cache for downloaded files.
//!
//! The main entry point is [`FileDownloadCache`], which stores remote files below a root
//! directory and hands out private copies of them. Where the files come from is up to the
//! [`Downloader`] passed to each fetch; [`download`] ships downloaders for local directories and
//! HTTP servers.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod download;
pub mod error;
pub mod logging;

pub use caching::FileDownloadCache;
pub use download::Downloader;
pub use error::RetrievalError;
