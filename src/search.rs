use std::cell::Cell;
use std::time::Instant;

use regex::Regex;
use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::builder::root_failure;
use crate::domain::{Filter, LevelKind};
use crate::error::InventoryError;
use crate::lister::{DirectoryLister, RemotePath, container_names};
use crate::tree::{ArchiveTree, Node};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutcome {
    /// Matching remote file paths, in traversal order.
    pub files: Vec<String>,
    /// Listing calls issued against the archive.
    pub listings: usize,
    /// Branches skipped because the filter rejected them.
    pub pruned: usize,
}

/// Finds the leaf files whose ancestors satisfy a [`Filter`].
///
/// Rejected branches are never listed. At `Version` depth only the latest
/// version is followed.
pub struct TreeSearcher<'a, L: DirectoryLister> {
    lister: &'a L,
    levels: &'a [LevelKind],
    filter: &'a Filter,
    listings: Cell<usize>,
    pruned: Cell<usize>,
}

impl<'a, L: DirectoryLister> TreeSearcher<'a, L> {
    pub fn new(lister: &'a L, levels: &'a [LevelKind], filter: &'a Filter) -> Self {
        Self {
            lister,
            levels,
            filter,
            listings: Cell::new(0),
            pruned: Cell::new(0),
        }
    }

    /// Descends from the archive root, listing only branches that can match.
    pub fn search_live(&self, sink: &dyn ProgressSink) -> Result<SearchOutcome, InventoryError> {
        self.reset();
        let start = Instant::now();
        let root = RemotePath::root();
        let mut files = Vec::new();

        if self.levels.first() == Some(&LevelKind::File) {
            files = self
                .count(|| self.lister.list_files(&root))
                .map_err(|err| root_failure(self.lister, &root, err))?;
        } else if !self.levels.is_empty() {
            let names = self
                .count(|| self.lister.list(&root))
                .map(container_names)
                .map_err(|err| root_failure(self.lister, &root, err))?;
            for name in self.select(0, names) {
                self.descend_live(1, &root.join(&name), &mut files);
            }
        }

        Ok(self.finish(files, start, sink))
    }

    /// Walks a cached tree. Below the tree's expanded depth the search
    /// continues live from the deepest cached node.
    pub fn search_cached(
        &self,
        tree: &ArchiveTree,
        sink: &dyn ProgressSink,
    ) -> Result<SearchOutcome, InventoryError> {
        if tree.levels() != self.levels {
            return Err(InventoryError::Snapshot(
                "cached inventory was built for a different archive layout".to_string(),
            ));
        }
        self.reset();
        let start = Instant::now();
        let mut files = Vec::new();
        if !self.levels.is_empty() {
            self.descend_cached(tree, tree.roots(), 0, &RemotePath::root(), &mut files);
        }
        Ok(self.finish(files, start, sink))
    }

    fn descend_cached(
        &self,
        tree: &ArchiveTree,
        nodes: &[Node],
        depth: usize,
        parent: &RemotePath,
        files: &mut Vec<String>,
    ) {
        let kind = self.levels[depth];
        if kind == LevelKind::File {
            files.extend(nodes.iter().filter_map(|node| node.resource.clone()));
            return;
        }
        let names: Vec<String> = nodes.iter().map(|node| node.name.clone()).collect();
        for name in self.select(depth, names) {
            let Some(node) = nodes.iter().find(|node| node.name == name) else {
                continue;
            };
            let path = parent.join(&node.name);
            if depth + 1 >= self.levels.len() {
                continue;
            }
            if depth + 1 < tree.expanded_depth() {
                self.descend_cached(tree, &node.children, depth + 1, &path, files);
            } else {
                self.descend_live(depth + 1, &path, files);
            }
        }
    }

    /// Lists the node at `path`, whose children are of `levels[depth]`.
    fn descend_live(&self, depth: usize, path: &RemotePath, files: &mut Vec<String>) {
        let Some(&kind) = self.levels.get(depth) else {
            return;
        };
        if kind == LevelKind::File {
            match self.count(|| self.lister.list_files(path)) {
                Ok(found) => {
                    tracing::debug!(container = %path, files = found.len(), "matched files");
                    files.extend(found);
                }
                Err(err) => self.branch_failed(path, &err),
            }
            return;
        }

        let names = match self.count(|| self.lister.list(path)) {
            Ok(entries) => container_names(entries),
            Err(err) => {
                self.branch_failed(path, &err);
                return;
            }
        };
        for name in self.select(depth, names) {
            self.descend_live(depth + 1, &path.join(&name), files);
        }
    }

    /// Applies the filter (and the latest-version rule) to the children of
    /// one node.
    fn select(&self, depth: usize, names: Vec<String>) -> Vec<String> {
        let kind = self.levels[depth];
        let before = names.len();
        let mut accepted: Vec<String> = names
            .into_iter()
            .filter(|name| self.filter.accepts(kind, name))
            .collect();
        if kind == LevelKind::Version && accepted.len() > 1 {
            accepted = select_latest_version(&accepted).into_iter().collect();
        }
        self.pruned.set(self.pruned.get() + before - accepted.len());
        accepted
    }

    fn count<T>(
        &self,
        call: impl FnOnce() -> Result<T, InventoryError>,
    ) -> Result<T, InventoryError> {
        self.listings.set(self.listings.get() + 1);
        call()
    }

    fn branch_failed(&self, path: &RemotePath, err: &InventoryError) {
        tracing::warn!(
            container = %self.lister.describe(path),
            error = %err,
            "listing failed; skipping branch"
        );
    }

    fn reset(&self) {
        self.listings.set(0);
        self.pruned.set(0);
    }

    fn finish(&self, files: Vec<String>, start: Instant, sink: &dyn ProgressSink) -> SearchOutcome {
        let outcome = SearchOutcome {
            files,
            listings: self.listings.get(),
            pruned: self.pruned.get(),
        };
        sink.event(ProgressEvent {
            message: format!(
                "search; matched={}; listings={}; pruned={}",
                outcome.files.len(),
                outcome.listings,
                outcome.pruned
            ),
            elapsed: Some(start.elapsed()),
        });
        outcome
    }
}

/// Numeric part of a version directory name such as `v20230101`.
pub fn parse_version(name: &str) -> Result<u64, InventoryError> {
    let pattern = Regex::new(r"^[A-Za-z](\d+)$")
        .map_err(|err| InventoryError::VersionParse(err.to_string()))?;
    pattern
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse::<u64>().ok())
        .ok_or_else(|| InventoryError::VersionParse(name.to_string()))
}

/// Picks the latest of several version directories. A single candidate is
/// returned as is. Names that do not parse are skipped; only when none parses
/// is the lexicographic maximum used instead.
pub fn select_latest_version(versions: &[String]) -> Option<String> {
    if versions.len() <= 1 {
        return versions.first().cloned();
    }
    let mut latest: Option<(u64, &String)> = None;
    for name in versions {
        match parse_version(name) {
            Ok(number) => {
                if latest.is_none_or(|(current, _)| number > current) {
                    latest = Some((number, name));
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "ignoring version directory that does not parse")
            }
        }
    }
    match latest {
        Some((_, name)) => Some(name.clone()),
        None => {
            tracing::warn!(?versions, "no version parses; using lexicographic order");
            versions.iter().max().cloned()
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn numeric_version_order() {
        assert_eq!(
            select_latest_version(&names(&["v1", "v2", "v10"])),
            Some("v10".to_string())
        );
        assert_eq!(
            select_latest_version(&names(&["v20190101", "v20230405"])),
            Some("v20230405".to_string())
        );
    }

    #[test]
    fn single_version_is_taken_verbatim() {
        assert_eq!(select_latest_version(&names(&["v3"])), Some("v3".to_string()));
        assert_eq!(select_latest_version(&names(&["latest"])), Some("latest".to_string()));
        assert_eq!(select_latest_version(&[]), None);
    }

    #[test]
    fn unparseable_versions_are_skipped() {
        assert_eq!(
            select_latest_version(&names(&["v2", "v10", "latest"])),
            Some("v10".to_string())
        );
        assert_eq!(
            select_latest_version(&names(&["v1", "latest"])),
            Some("v1".to_string())
        );
        assert_eq!(
            select_latest_version(&names(&["current", "latest"])),
            Some("latest".to_string())
        );
        assert_matches!(parse_version("latest"), Err(InventoryError::VersionParse(_)));
        assert_eq!(parse_version("v007").unwrap(), 7);
    }
}
