use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, NaiveDateTime, Utc};
use directories::BaseDirs;
use regex::Regex;

use crate::error::InventoryError;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M";

/// Local state: inventory snapshots and search logs.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, InventoryError> {
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("ccmi-inventory"))
                    .ok()
            })
            .ok_or_else(|| {
                InventoryError::Filesystem("unable to resolve state directory".to_string())
            })?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn inventory_dir(&self) -> Utf8PathBuf {
        self.root.join("inventories")
    }

    pub fn search_dir(&self) -> Utf8PathBuf {
        self.root.join("searches")
    }

    pub fn snapshot_path(&self, label: &str, at: &DateTime<Utc>) -> Utf8PathBuf {
        self.inventory_dir().join(format!(
            "{label}_archive_{}.json",
            at.format(TIMESTAMP_FORMAT)
        ))
    }

    pub fn search_log_path(&self, label: &str, at: &DateTime<Utc>) -> Utf8PathBuf {
        self.search_dir()
            .join(format!("{label}_search_{}.log", at.format(TIMESTAMP_FORMAT)))
    }

    /// Always points at the log of the most recent search.
    pub fn latest_search_log_path(&self, label: &str) -> Utf8PathBuf {
        self.search_dir().join(format!("{label}_search.log"))
    }

    pub fn ensure_root(&self) -> Result<(), InventoryError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| InventoryError::Filesystem(err.to_string()))
    }

    /// Newest snapshot for `label`, judged by the timestamp in its file name.
    pub fn latest_snapshot(&self, label: &str) -> Result<Option<Utf8PathBuf>, InventoryError> {
        let dir = self.inventory_dir();
        if !dir.as_std_path().exists() {
            return Ok(None);
        }
        let pattern = Regex::new(&format!(
            r"^{}_archive_(\d{{12}})\.json$",
            regex::escape(label)
        ))
        .map_err(|err| InventoryError::Snapshot(err.to_string()))?;

        let mut newest: Option<(NaiveDateTime, Utf8PathBuf)> = None;
        let entries =
            fs::read_dir(dir.as_std_path()).map_err(|err| InventoryError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| InventoryError::Filesystem(err.to_string()))?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            let Some(stamp) = path
                .file_name()
                .and_then(|name| pattern.captures(name))
                .and_then(|caps| caps.get(1))
                .and_then(|stamp| {
                    NaiveDateTime::parse_from_str(stamp.as_str(), TIMESTAMP_FORMAT).ok()
                })
            else {
                continue;
            };
            if newest.as_ref().is_none_or(|(current, _)| stamp > *current) {
                newest = Some((stamp, path));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), InventoryError> {
        let parent = path
            .parent()
            .ok_or_else(|| InventoryError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| InventoryError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("ccmi-inv")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| InventoryError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content)
            .map_err(|err| InventoryError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| InventoryError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Writes one path per line to a timestamped log and to the fixed
    /// latest-search log.
    pub fn write_search_log(
        &self,
        label: &str,
        files: &[String],
    ) -> Result<Utf8PathBuf, InventoryError> {
        let mut content = files.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        let path = self.search_log_path(label, &Utc::now());
        Self::write_bytes_atomic(&path, content.as_bytes())?;
        Self::write_bytes_atomic(&self.latest_search_log_path(label), content.as_bytes())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new_with_root(Utf8PathBuf::from("/tmp/ccmi-state"));
        let at = Utc.with_ymd_and_hms(2025, 4, 3, 19, 36, 0).unwrap();
        assert_eq!(
            store.snapshot_path("CCMI-2022", &at),
            Utf8PathBuf::from("/tmp/ccmi-state/inventories/CCMI-2022_archive_202504031936.json")
        );
        assert!(store.search_log_path("CCMI-1", &at).ends_with("CCMI-1_search_202504031936.log"));
    }
}
