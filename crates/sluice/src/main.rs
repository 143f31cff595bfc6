//! Sluice.
//!
//! Sluice is a small static file server. Concurrent requests for the same file share a single
//! disk read, and recently served files are kept in memory until they change on disk. Files can
//! be added through a multipart upload endpoint.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod endpoints;
mod logging;
mod server;
mod service;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
