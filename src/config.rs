use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{
    ArchiveLayout, DEFAULT_DOWNLOAD_BASE_URL, DEFAULT_FTP_HOST, Filter, LevelKind, Protocol,
    frequency_name,
};
use crate::error::InventoryError;
use crate::lister::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_CONFIG_FILE: &str = "ccmi-inventory.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub layout: Option<ArchiveLayout>,
    #[serde(default)]
    pub protocol: Option<Protocol>,
    /// Catalog root URL (THREDDS) or root directory (FTP).
    #[serde(default)]
    pub root_url: Option<String>,
    #[serde(default)]
    pub ftp: Option<FtpSection>,
    #[serde(default)]
    pub download_base_url: Option<String>,
    #[serde(default)]
    pub experiments: Vec<String>,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub tables: Vec<String>,
    /// `<variable>_<table>` pairs, e.g. `o3_AmonZ`.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Frequency domain such as `mon`; also fixes the frequency-name level.
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub filter: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub overwrite_existing: Option<bool>,
    #[serde(default)]
    pub download_root: Option<String>,
    #[serde(default)]
    pub state_dir: Option<String>,
    #[serde(default)]
    pub max_retries_per_listing: Option<usize>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub inventory_depth: Option<usize>,
    #[serde(default)]
    pub max_failure_ratio: Option<f64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FtpSection {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    /// Archive root directory on the FTP server.
    #[serde(default)]
    pub root: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FtpSettings {
    pub host: String,
    pub user: Option<String>,
}

/// Everything a traversal, search or download run needs.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub layout: ArchiveLayout,
    pub levels: Vec<LevelKind>,
    pub protocol: Protocol,
    pub root: String,
    pub ftp: FtpSettings,
    pub download_base_url: String,
    pub filter: Filter,
    pub overwrite_existing: bool,
    pub download_root: Utf8PathBuf,
    pub state_dir: Option<Utf8PathBuf>,
    pub max_retries_per_listing: usize,
    pub retry_delay: Duration,
    pub inventory_depth: Option<usize>,
    pub max_failure_ratio: f64,
}

impl ResolvedConfig {
    /// An empty filter asks for the inventory only.
    pub fn wants_search(&self) -> bool {
        !self.filter.is_empty()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, InventoryError> {
        Self::resolve_config(Self::load(path)?)
    }

    pub fn load(path: Option<&str>) -> Result<Config, InventoryError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(InventoryError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| InventoryError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| InventoryError::ConfigParse(err.to_string()))
    }

    /// Like [`ConfigLoader::load`], but a missing default config file yields
    /// the built-in defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Config, InventoryError> {
        match Self::load(path) {
            Err(InventoryError::MissingConfig) => Ok(Config::default()),
            other => other,
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, InventoryError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let layout = config.layout.unwrap_or(ArchiveLayout::Ccmi2022);
        let levels = layout.levels();
        let protocol = config.protocol.unwrap_or(Protocol::Thredds);

        let ftp_section = config.ftp.unwrap_or_default();
        let root = match protocol {
            Protocol::Thredds => config
                .root_url
                .unwrap_or_else(|| layout.default_catalog_root().to_string()),
            Protocol::Ftp => ftp_section
                .root
                .or(config.root_url)
                .unwrap_or_else(|| layout.default_ftp_root().to_string()),
        };
        let ftp = FtpSettings {
            host: ftp_section
                .host
                .unwrap_or_else(|| DEFAULT_FTP_HOST.to_string()),
            user: ftp_section.user,
        };

        let mut filter = Filter::new();
        if !config.experiments.is_empty() {
            filter.extend(LevelKind::Experiment, config.experiments);
        }
        if !config.variables.is_empty() {
            filter.extend(LevelKind::Variable, config.variables);
        }
        if !config.tables.is_empty() {
            filter.extend(LevelKind::Table, config.tables);
        }
        for target in &config.targets {
            filter.add_target(target)?;
        }
        if let Some(frequency) = config.frequency {
            if levels.contains(&LevelKind::FrequencyName) {
                let name = frequency_name(&frequency).ok_or_else(|| {
                    InventoryError::InvalidFilter(format!("unknown frequency: {frequency}"))
                })?;
                filter.extend(LevelKind::FrequencyName, [name]);
            }
            filter.extend(LevelKind::FrequencyDomain, [frequency]);
        }
        for (level, values) in config.filter {
            let kind: LevelKind = level.parse()?;
            filter.extend(kind, values);
        }
        filter.validate(&levels)?;

        let max_failure_ratio = config.max_failure_ratio.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&max_failure_ratio) {
            return Err(InventoryError::ConfigParse(format!(
                "max_failure_ratio must be within 0..=1, got {max_failure_ratio}"
            )));
        }

        Ok(ResolvedConfig {
            schema_version,
            layout,
            levels,
            protocol,
            root,
            ftp,
            download_base_url: config
                .download_base_url
                .unwrap_or_else(|| DEFAULT_DOWNLOAD_BASE_URL.to_string()),
            filter,
            overwrite_existing: config.overwrite_existing.unwrap_or(false),
            download_root: Utf8PathBuf::from(
                config.download_root.unwrap_or_else(|| "downloads".to_string()),
            ),
            state_dir: config.state_dir.map(Utf8PathBuf::from),
            max_retries_per_listing: config
                .max_retries_per_listing
                .unwrap_or(DEFAULT_MAX_ATTEMPTS)
                .max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms.unwrap_or(0)),
            inventory_depth: config.inventory_depth,
            max_failure_ratio,
        })
    }
}
