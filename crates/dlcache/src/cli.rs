//! Exposes the command line application.
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use download_cache::FileDownloadCache;
use download_cache::config::Config;
use download_cache::download::SourceDownloader;
use download_cache::metrics;

use crate::logging;

/// Download cache commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch a remote file through the cache.
    Fetch {
        /// The remote id of the file.
        remote_id: String,

        /// Where to write the file to, `stdout` if omitted.
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// List all cached files, oldest first.
    List,

    /// Evict the oldest files until the cache fits its budget.
    Evict {
        /// Use this budget in bytes instead of the configured one.
        #[arg(long, value_name = "BYTES")]
        max_size: Option<u64>,
    },

    /// Delete all cached files.
    Empty,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(bin_name = "dlcache", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The runtime has not been started yet, so there is only a single thread.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(&config.metrics.prefix, statsd, BTreeMap::new())
            .context("failed to configure statsd")?;
    }

    let cache = FileDownloadCache::from_config(&config.cache).context("failed to open cache")?;

    match cli.command {
        Command::Fetch { remote_id, output } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start runtime")?;
            runtime.block_on(fetch(&config, &cache, &remote_id, output.as_deref()))?;
        }
        Command::List => list(&cache),
        Command::Evict { max_size } => {
            if let Some(max_size) = max_size {
                cache.set_max_cache_size(max_size);
            }
            let stats = cache.evict();
            println!(
                "removed {} files ({} bytes), {} files could not be removed, {} files were in use",
                stats.removed_files, stats.removed_bytes, stats.failed_files, stats.busy_files
            );
        }
        Command::Empty => cache.empty().context("failed to empty cache")?,
    }

    Ok(())
}

async fn fetch(
    config: &Config,
    cache: &FileDownloadCache,
    remote_id: &str,
    output: Option<&Path>,
) -> Result<()> {
    let downloader = SourceDownloader::from_config(config)
        .context("failed to create downloader")?
        .context("no source configured")?;

    let file = cache
        .fetch_remote_file(&downloader, remote_id)
        .await
        .with_context(|| format!("failed to fetch `{remote_id}`"))?;

    match output {
        Some(output) => {
            tokio::fs::copy(file.path(), output)
                .await
                .with_context(|| format!("failed to write `{}`", output.display()))?;
        }
        None => {
            let mut reader = file.reopen()?;
            io::copy(&mut reader, &mut io::stdout().lock())?;
        }
    }

    Ok(())
}

fn list(cache: &FileDownloadCache) {
    for (remote_id, entry) in cache.entries() {
        println!(
            "{}  {:>12}  {}",
            humantime::format_rfc3339_seconds(entry.modified),
            entry.size,
            remote_id
        );
    }

    let stats = cache.stats();
    println!(
        "{} files, {} of {} bytes used",
        stats.entries, stats.total_size, stats.max_cache_size
    );
}
