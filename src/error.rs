use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum InventoryError {
    #[error("listing failed for {container}: {message}")]
    Listing { container: String, message: String },

    #[error("root catalog {root} could not be listed: {message}")]
    #[diagnostic(help("no part of the archive can be discovered; check the root URL and network access"))]
    RootListing { root: String, message: String },

    #[error("malformed listing response from {container}: {message}")]
    MalformedResponse { container: String, message: String },

    #[error("download of {path} failed: {message}")]
    Download { path: String, message: String },

    #[error("download of {path} returned status {status}")]
    DownloadStatus { path: String, status: u16 },

    #[error("{failed} of {total} downloads failed")]
    DownloadFailures { failed: usize, total: usize },

    #[error("version directory name not of the form <letter><digits>: {0}")]
    VersionParse(String),

    #[error("missing config file ccmi-inventory.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("unknown archive level: {0}")]
    InvalidLevel(String),

    #[error("inventory snapshot error: {0}")]
    Snapshot(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("FTP session failed: {0}")]
    Ftp(String),

    #[error("HTTP client setup failed: {0}")]
    Http(String),
}

impl InventoryError {
    /// Transport-level listing failures are worth another attempt; parse
    /// failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InventoryError::Listing { .. })
    }
}
