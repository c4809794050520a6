//! imagefetch.
//!
//! A command line client for the image fetcher. It fetches thumbnails of remote images through
//! the same memory and disk caches an embedding application would use, and can show where an
//! image is cached on disk.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

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
