//! Command line access to a download cache.
//!
//! `dlcache` opens the cache described by its configuration file and allows fetching files
//! through it, inspecting its contents, and evicting or deleting cached files.

#![warn(missing_debug_implementations, unused_crate_dependencies, clippy::all)]

mod cli;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
