use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::builder::TreeBuilder;
use crate::config::ResolvedConfig;
use crate::domain::LevelKind;
use crate::download::{DownloadAction, DownloadOptions, DownloadReport, Downloader, FileFetcher};
use crate::error::InventoryError;
use crate::lister::DirectoryLister;
use crate::search::TreeSearcher;
use crate::snapshot::InventorySnapshot;
use crate::store::Store;
use crate::tree::ArchiveTree;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelCount {
    pub level: LevelKind,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryResult {
    pub layout: String,
    pub root: String,
    /// `built` for a fresh traversal, `loaded` for a reloaded snapshot.
    pub source: String,
    pub snapshot_path: Option<String>,
    pub expanded_depth: usize,
    pub levels: Vec<LevelCount>,
    pub files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// `cached` when an inventory was used, `live` otherwise.
    pub mode: String,
    pub files: Vec<String>,
    pub listings: usize,
    pub pruned: usize,
    pub log_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub root: String,
    pub downloaded: usize,
    pub skipped: usize,
    pub planned: usize,
    pub failed: usize,
    pub failure_ratio: f64,
    pub report: DownloadReport,
}

impl DownloadResult {
    fn from_report(root: &Utf8Path, report: DownloadReport) -> Self {
        Self {
            root: root.to_string(),
            downloaded: report.count(DownloadAction::Downloaded),
            skipped: report.count(DownloadAction::Skipped),
            planned: report.count(DownloadAction::Planned),
            failed: report.count(DownloadAction::Failed),
            failure_ratio: report.failure_ratio(),
            report,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub inventory: InventoryResult,
    pub search: Option<SearchResult>,
    pub download: Option<DownloadResult>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Snapshot to reuse instead of traversing the archive.
    pub inventory: Option<Utf8PathBuf>,
    /// Reuse the newest stored snapshot when no explicit one is given.
    pub reuse_latest: bool,
    pub dry_run: bool,
}

pub struct App<L: DirectoryLister, F: FileFetcher> {
    store: Store,
    config: ResolvedConfig,
    lister: L,
    fetcher: F,
}

impl<L: DirectoryLister, F: FileFetcher> App<L, F> {
    pub fn new(store: Store, config: ResolvedConfig, lister: L, fetcher: F) -> Self {
        Self {
            store,
            config,
            lister,
            fetcher,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn label(&self) -> &'static str {
        self.config.layout.label()
    }

    /// Traverses the archive and persists the result as a snapshot.
    pub fn inventory(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<(ArchiveTree, InventoryResult), InventoryError> {
        sink.event(ProgressEvent {
            message: format!("phase=Inventory; root={}", self.config.root),
            elapsed: None,
        });
        let start = Instant::now();
        let tree = TreeBuilder::new(&self.lister, &self.config.levels)
            .with_max_depth(self.config.inventory_depth)
            .build(sink)?;

        let snapshot = InventorySnapshot::from_tree(&tree, &self.config.root);
        let path = snapshot.persist(&self.store, self.label())?;
        tracing::info!(path = %path, "inventory snapshot written");
        sink.event(ProgressEvent {
            message: format!("phase=Inventory; snapshot={path}"),
            elapsed: Some(start.elapsed()),
        });

        let result = self.summarize(&tree, "built", Some(path));
        Ok((tree, result))
    }

    /// Reloads `path`, or the newest stored snapshot when `path` is `None`.
    /// Returns `None` when no snapshot exists yet.
    pub fn load_inventory(
        &self,
        path: Option<&Utf8Path>,
        sink: &dyn ProgressSink,
    ) -> Result<Option<(ArchiveTree, InventoryResult)>, InventoryError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match self.store.latest_snapshot(self.label())? {
                Some(path) => path,
                None => return Ok(None),
            },
        };
        sink.event(ProgressEvent {
            message: format!("phase=Inventory; loading {path}"),
            elapsed: None,
        });
        let snapshot = InventorySnapshot::load(&path)?;
        if snapshot.root != self.config.root {
            tracing::warn!(
                snapshot_root = %snapshot.root,
                configured_root = %self.config.root,
                "inventory snapshot was taken from a different root"
            );
        }
        let tree = snapshot.into_tree()?;
        let result = self.summarize(&tree, "loaded", Some(path));
        Ok(Some((tree, result)))
    }

    fn summarize(
        &self,
        tree: &ArchiveTree,
        source: &str,
        path: Option<Utf8PathBuf>,
    ) -> InventoryResult {
        InventoryResult {
            layout: self.label().to_string(),
            root: self.config.root.clone(),
            source: source.to_string(),
            snapshot_path: path.map(|path| path.to_string()),
            expanded_depth: tree.expanded_depth(),
            levels: tree
                .levels()
                .iter()
                .zip(tree.level_counts())
                .map(|(level, count)| LevelCount {
                    level: *level,
                    count,
                })
                .collect(),
            files: tree.file_count(),
        }
    }

    /// Searches with the configured filter and writes the search log.
    pub fn search(
        &self,
        cached: Option<&ArchiveTree>,
        sink: &dyn ProgressSink,
    ) -> Result<SearchResult, InventoryError> {
        let searcher = TreeSearcher::new(&self.lister, &self.config.levels, &self.config.filter);
        let (mode, outcome) = match cached {
            Some(tree) => ("cached", searcher.search_cached(tree, sink)?),
            None => ("live", searcher.search_live(sink)?),
        };
        let log_path = self.store.write_search_log(self.label(), &outcome.files)?;
        tracing::info!(path = %log_path, files = outcome.files.len(), "search log written");

        Ok(SearchResult {
            mode: mode.to_string(),
            files: outcome.files,
            listings: outcome.listings,
            pruned: outcome.pruned,
            log_path: Some(log_path.to_string()),
        })
    }

    pub fn download(
        &self,
        files: &[String],
        dry_run: bool,
        sink: &dyn ProgressSink,
    ) -> DownloadResult {
        sink.event(ProgressEvent {
            message: format!(
                "phase=Download; files={}; root={}",
                files.len(),
                self.config.download_root
            ),
            elapsed: None,
        });
        let downloader = Downloader::new(
            &self.fetcher,
            self.config.download_root.clone(),
            DownloadOptions {
                overwrite_existing: self.config.overwrite_existing,
                dry_run,
            },
        );
        let report = downloader.download_all(files, sink);
        DownloadResult::from_report(&self.config.download_root, report)
    }

    /// Inventory (fresh or reloaded), then search and download when the filter
    /// selects anything. An empty filter stops after the inventory.
    pub fn run(
        &self,
        options: RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, InventoryError> {
        let loaded = if options.inventory.is_some() || options.reuse_latest {
            self.load_inventory(options.inventory.as_deref(), sink)?
        } else {
            None
        };
        let (tree, inventory) = match loaded {
            Some(loaded) => loaded,
            None => self.inventory(sink)?,
        };

        if !self.config.wants_search() {
            sink.event(ProgressEvent {
                message: "phase=Search; no filter configured, inventory only".to_string(),
                elapsed: None,
            });
            return Ok(RunResult {
                inventory,
                search: None,
                download: None,
            });
        }

        let search = self.search(Some(&tree), sink)?;
        let download = self.download(&search.files, options.dry_run, sink);
        Ok(RunResult {
            inventory,
            search: Some(search),
            download: Some(download),
        })
    }

    /// Fails when the share of failed downloads is above the configured
    /// tolerance.
    pub fn check_failures(&self, result: &DownloadResult) -> Result<(), InventoryError> {
        if result.failed > 0 && result.failure_ratio > self.config.max_failure_ratio {
            return Err(InventoryError::DownloadFailures {
                failed: result.failed,
                total: result.report.items.len(),
            });
        }
        Ok(())
    }
}

/// Reads one remote path per line, ignoring blank lines.
pub fn read_file_list(path: &Utf8Path) -> Result<Vec<String>, InventoryError> {
    let content = std::fs::read_to_string(path.as_std_path())
        .map_err(|err| InventoryError::Filesystem(format!("read {path}: {err}")))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
