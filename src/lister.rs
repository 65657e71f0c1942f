use std::fmt;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::InventoryError;

pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Names from the archive root down to a container, e.g. `CCCma/CMAM/refC1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemotePath(Vec<String>);

impl RemotePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn join(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Container,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl ListingEntry {
    pub fn container(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Container,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }
}

/// Lists the immediate children of one remote container.
///
/// `list` returns the sub-containers of `path` in listing order. `list_files`
/// is the terminal call: it returns the remote paths of the downloadable
/// resources directly under `path`.
pub trait DirectoryLister: Send + Sync {
    fn list(&self, path: &RemotePath) -> Result<Vec<ListingEntry>, InventoryError>;
    fn list_files(&self, path: &RemotePath) -> Result<Vec<String>, InventoryError>;
    /// Human readable location of `path` (catalog URL or FTP directory).
    fn describe(&self, path: &RemotePath) -> String;
}

impl<L: DirectoryLister + ?Sized> DirectoryLister for &L {
    fn list(&self, path: &RemotePath) -> Result<Vec<ListingEntry>, InventoryError> {
        (**self).list(path)
    }

    fn list_files(&self, path: &RemotePath) -> Result<Vec<String>, InventoryError> {
        (**self).list_files(path)
    }

    fn describe(&self, path: &RemotePath) -> String {
        (**self).describe(path)
    }
}

impl<L: DirectoryLister + ?Sized> DirectoryLister for Box<L> {
    fn list(&self, path: &RemotePath) -> Result<Vec<ListingEntry>, InventoryError> {
        (**self).list(path)
    }

    fn list_files(&self, path: &RemotePath) -> Result<Vec<String>, InventoryError> {
        (**self).list_files(path)
    }

    fn describe(&self, path: &RemotePath) -> String {
        (**self).describe(path)
    }
}

/// Retries each listing call up to `max_attempts` times before handing the
/// last error back. Scope policy (fatal root, empty branch) is up to the
/// caller.
#[derive(Debug, Clone)]
pub struct Retrying<L> {
    inner: L,
    max_attempts: usize,
    delay: Duration,
}

impl<L: DirectoryLister> Retrying<L> {
    pub fn new(inner: L, max_attempts: usize) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    fn call_with_retries<T, F>(&self, path: &RemotePath, mut call: F) -> Result<T, InventoryError>
    where
        F: FnMut() -> Result<T, InventoryError>,
    {
        let mut attempt = 1usize;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    tracing::debug!(
                        container = %self.inner.describe(path),
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "listing failed, trying again"
                    );
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<L: DirectoryLister> DirectoryLister for Retrying<L> {
    fn list(&self, path: &RemotePath) -> Result<Vec<ListingEntry>, InventoryError> {
        self.call_with_retries(path, || self.inner.list(path))
    }

    fn list_files(&self, path: &RemotePath) -> Result<Vec<String>, InventoryError> {
        self.call_with_retries(path, || self.inner.list_files(path))
    }

    fn describe(&self, path: &RemotePath) -> String {
        self.inner.describe(path)
    }
}

/// Container names of a listing, in order.
pub fn container_names(entries: Vec<ListingEntry>) -> Vec<String> {
    entries
        .into_iter()
        .filter(|entry| entry.kind == EntryKind::Container)
        .map(|entry| entry.name)
        .collect()
}
