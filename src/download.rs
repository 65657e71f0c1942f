use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::builder::file_name;
use crate::error::InventoryError;
use crate::ftp::FtpClient;

/// Field of an underscore-separated CMOR file name that holds the experiment
/// (`<variable>_<table>_<model>_<experiment>_...`).
const EXPERIMENT_FIELD: usize = 3;

/// Transfers one remote file to a local path.
pub trait FileFetcher: Send + Sync {
    fn fetch(&self, remote: &str, destination: &Path) -> Result<(), InventoryError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpAuth {
    pub bearer_token: Option<String>,
    /// PEM bundle holding a client certificate and its private key.
    pub client_identity_pem: Option<Vec<u8>>,
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: &str, auth: HttpAuth) -> Result<Self, InventoryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ccmi-inv/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| InventoryError::Http(err.to_string()))?,
        );
        if let Some(token) = auth.bearer_token.as_deref().map(str::trim) {
            if !token.is_empty() {
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|err| InventoryError::Http(err.to_string()))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600));
        if let Some(pem) = auth.client_identity_pem.as_deref() {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|err| InventoryError::Http(err.to_string()))?;
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|err| InventoryError::Http(err.to_string()))?;

        let mut base_url = base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self { client, base_url })
    }

    pub fn file_url(&self, remote: &str) -> String {
        format!("{}{}", self.base_url, remote.trim_start_matches('/'))
    }
}

impl FileFetcher for HttpFetcher {
    fn fetch(&self, remote: &str, destination: &Path) -> Result<(), InventoryError> {
        let url = self.file_url(remote);
        let mut response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| InventoryError::Download {
                path: url.clone(),
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(InventoryError::DownloadStatus {
                path: url,
                status: response.status().as_u16(),
            });
        }
        let mut file =
            File::create(destination).map_err(|err| InventoryError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file).map_err(|err| InventoryError::Download {
            path: url,
            message: err.to_string(),
        })?;
        Ok(())
    }
}

pub struct FtpFetcher<C: FtpClient> {
    client: C,
}

impl<C: FtpClient> FtpFetcher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C: FtpClient> FileFetcher for FtpFetcher<C> {
    fn fetch(&self, remote: &str, destination: &Path) -> Result<(), InventoryError> {
        self.client.retrieve(remote, destination)
    }
}

impl<F: FileFetcher + ?Sized> FileFetcher for &F {
    fn fetch(&self, remote: &str, destination: &Path) -> Result<(), InventoryError> {
        (**self).fetch(remote, destination)
    }
}

impl<F: FileFetcher + ?Sized> FileFetcher for Box<F> {
    fn fetch(&self, remote: &str, destination: &Path) -> Result<(), InventoryError> {
        (**self).fetch(remote, destination)
    }
}

/// `<root>/<experiment>/<filename>`, or `<root>/<filename>` when the name has
/// no experiment field.
pub fn destination_for(root: &Utf8Path, remote: &str) -> Utf8PathBuf {
    let name = file_name(remote);
    match name.split('_').nth(EXPERIMENT_FIELD) {
        Some(experiment) if !experiment.is_empty() => root.join(experiment).join(name),
        _ => {
            tracing::warn!(file = %name, "no experiment field in file name; storing at download root");
            root.join(name)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadAction {
    Downloaded,
    Skipped,
    Planned,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadItem {
    pub remote: String,
    pub destination: String,
    pub action: DownloadAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub items: Vec<DownloadItem>,
}

impl DownloadReport {
    pub fn count(&self, action: DownloadAction) -> usize {
        self.items.iter().filter(|item| item.action == action).count()
    }

    pub fn failure_ratio(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        self.count(DownloadAction::Failed) as f64 / self.items.len() as f64
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub overwrite_existing: bool,
    pub dry_run: bool,
}

/// Fetches files one by one. Existing destinations are left alone unless
/// overwriting is enabled; a failed file never stops the batch.
pub struct Downloader<'a, F: FileFetcher> {
    fetcher: &'a F,
    root: Utf8PathBuf,
    options: DownloadOptions,
}

impl<'a, F: FileFetcher> Downloader<'a, F> {
    pub fn new(fetcher: &'a F, root: Utf8PathBuf, options: DownloadOptions) -> Self {
        Self {
            fetcher,
            root,
            options,
        }
    }

    pub fn download_all(&self, files: &[String], sink: &dyn ProgressSink) -> DownloadReport {
        let mut report = DownloadReport::default();
        for (index, remote) in files.iter().enumerate() {
            let item = self.download_one(remote);
            sink.event(ProgressEvent {
                message: format!(
                    "download {}/{}; {:?}; {}",
                    index + 1,
                    files.len(),
                    item.action,
                    item.destination
                ),
                elapsed: None,
            });
            report.items.push(item);
        }
        report
    }

    pub fn download_one(&self, remote: &str) -> DownloadItem {
        let destination = destination_for(&self.root, remote);
        let mut item = DownloadItem {
            remote: remote.to_string(),
            destination: destination.to_string(),
            action: DownloadAction::Skipped,
            error: None,
        };

        if !self.options.overwrite_existing && destination.as_std_path().exists() {
            tracing::info!(destination = %destination, "already exists, skipping");
            return item;
        }
        if self.options.dry_run {
            item.action = DownloadAction::Planned;
            return item;
        }

        let start = Instant::now();
        match self.fetch_atomic(remote, &destination) {
            Ok(()) => {
                tracing::info!(
                    destination = %destination,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "downloaded"
                );
                item.action = DownloadAction::Downloaded;
            }
            Err(err) => {
                tracing::warn!(remote = %remote, error = %err, "download failed");
                item.action = DownloadAction::Failed;
                item.error = Some(err.to_string());
            }
        }
        item
    }

    /// Downloads next to the destination and renames into place, so a failed
    /// transfer never leaves a partial file behind.
    fn fetch_atomic(&self, remote: &str, destination: &Utf8Path) -> Result<(), InventoryError> {
        let parent = destination
            .parent()
            .ok_or_else(|| InventoryError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| InventoryError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".ccmi-inv-part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| InventoryError::Filesystem(err.to_string()))?;
        self.fetcher.fetch(remote, temp.path())?;
        temp.persist(destination.as_std_path())
            .map_err(|err| InventoryError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_uses_experiment_field() {
        let root = Utf8PathBuf::from("/data/ccmi");
        let dest = destination_for(
            &root,
            "badc/ccmi/data/cly_AmonZ_CNRM-MOCAGE_refD1_r1i1p1f1_gnz_197201-197212.nc",
        );
        assert_eq!(
            dest,
            Utf8PathBuf::from(
                "/data/ccmi/refD1/cly_AmonZ_CNRM-MOCAGE_refD1_r1i1p1f1_gnz_197201-197212.nc"
            )
        );
    }

    #[test]
    fn destination_without_experiment_field() {
        let root = Utf8PathBuf::from("/data/ccmi");
        assert_eq!(
            destination_for(&root, "badc/readme_first.txt"),
            Utf8PathBuf::from("/data/ccmi/readme_first.txt")
        );
    }

    #[test]
    fn failure_ratio_of_empty_report() {
        assert_eq!(DownloadReport::default().failure_ratio(), 0.0);
    }
}
