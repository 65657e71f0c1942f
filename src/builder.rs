use std::time::Instant;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::LevelKind;
use crate::error::InventoryError;
use crate::lister::{DirectoryLister, RemotePath, container_names};
use crate::tree::{ArchiveTree, Node};

/// Materializes an [`ArchiveTree`] one depth at a time: every node of a depth
/// is listed before any node of the next one.
pub struct TreeBuilder<'a, L: DirectoryLister> {
    lister: &'a L,
    levels: &'a [LevelKind],
    max_depth: Option<usize>,
}

impl<'a, L: DirectoryLister> TreeBuilder<'a, L> {
    pub fn new(lister: &'a L, levels: &'a [LevelKind]) -> Self {
        Self {
            lister,
            levels,
            max_depth: None,
        }
    }

    /// Stops after `depth` levels (at least the root level is always listed).
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn build(&self, sink: &dyn ProgressSink) -> Result<ArchiveTree, InventoryError> {
        let target_depth = self
            .max_depth
            .unwrap_or(self.levels.len())
            .clamp(1, self.levels.len().max(1));
        let Some(&root_kind) = self.levels.first() else {
            return Ok(ArchiveTree::new(Vec::new(), Vec::new(), 0));
        };

        let start = Instant::now();
        let root = RemotePath::root();
        let roots = if root_kind == LevelKind::File {
            self.list_file_nodes(&root)
                .map_err(|err| root_failure(self.lister, &root, err))?
        } else {
            let entries = self
                .lister
                .list(&root)
                .map_err(|err| root_failure(self.lister, &root, err))?;
            container_names(entries)
                .into_iter()
                .map(|name| Node::container(root_kind, name))
                .collect()
        };
        sink.event(ProgressEvent {
            message: format!("level={root_kind}; total={}", roots.len()),
            elapsed: Some(start.elapsed()),
        });

        let mut tree = ArchiveTree::new(self.levels.to_vec(), roots, 1);
        for depth in 1..target_depth {
            self.expand_level(&mut tree, depth, sink);
            tree.mark_expanded(depth + 1);
        }
        Ok(tree)
    }

    fn expand_level(&self, tree: &mut ArchiveTree, depth: usize, sink: &dyn ProgressSink) {
        let kind = self.levels[depth];
        let start = Instant::now();
        let mut per_parent = Vec::new();
        let mut failures = 0usize;

        for (path, node) in tree.frontier_mut(depth - 1) {
            let children = if kind == LevelKind::File {
                self.list_file_nodes(&path)
            } else {
                self.lister.list(&path).map(|entries| {
                    container_names(entries)
                        .into_iter()
                        .map(|name| Node::container(kind, name))
                        .collect()
                })
            };
            node.children = match children {
                Ok(children) => children,
                Err(err) => {
                    failures += 1;
                    tracing::warn!(
                        container = %self.lister.describe(&path),
                        error = %err,
                        "listing failed; treating branch as empty"
                    );
                    Vec::new()
                }
            };
            per_parent.push(node.children.len());
        }

        let total: usize = per_parent.iter().sum();
        sink.event(ProgressEvent {
            message: format!(
                "level={kind}; total={total}; parents={}; failed={failures}; per_parent={per_parent:?}",
                per_parent.len()
            ),
            elapsed: Some(start.elapsed()),
        });
    }

    fn list_file_nodes(&self, path: &RemotePath) -> Result<Vec<Node>, InventoryError> {
        Ok(self
            .lister
            .list_files(path)?
            .into_iter()
            .map(|resource| {
                let name = file_name(&resource).to_string();
                Node::file(name, resource)
            })
            .collect())
    }
}

/// Final path component of a remote file path.
pub fn file_name(resource: &str) -> &str {
    resource.rsplit('/').next().unwrap_or(resource)
}

pub(crate) fn root_failure<L: DirectoryLister>(
    lister: &L,
    root: &RemotePath,
    err: InventoryError,
) -> InventoryError {
    InventoryError::RootListing {
        root: lister.describe(root),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_from_url_path() {
        assert_eq!(file_name("badc/ccmi/data/x/o3_Amon.nc"), "o3_Amon.nc");
        assert_eq!(file_name("plain.nc"), "plain.nc");
    }
}
