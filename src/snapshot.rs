use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::LevelKind;
use crate::error::InventoryError;
use crate::store::Store;
use crate::tree::{ArchiveTree, Node};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub name: String,
    pub children: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

/// Flattened, per-depth form of an [`ArchiveTree`].
///
/// `levels[d]` holds the nodes of depth `d` in breadth-first order; the
/// `children` counts tell how the entries of depth `d + 1` are split among
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub schema_version: u32,
    pub created_at: String,
    pub root: String,
    pub layout: Vec<LevelKind>,
    pub expanded_depth: usize,
    pub level_counts: Vec<usize>,
    pub levels: Vec<Vec<SnapshotEntry>>,
    pub tool: String,
}

impl InventorySnapshot {
    pub fn from_tree(tree: &ArchiveTree, root: &str) -> Self {
        let mut levels: Vec<Vec<SnapshotEntry>> = Vec::new();
        let mut frontier: Vec<&Node> = tree.roots().iter().collect();
        for _ in 0..tree.expanded_depth() {
            levels.push(
                frontier
                    .iter()
                    .map(|node| SnapshotEntry {
                        name: node.name.clone(),
                        children: node.children.len(),
                        resource: node.resource.clone(),
                    })
                    .collect(),
            );
            frontier = frontier
                .into_iter()
                .flat_map(|node| node.children.iter())
                .collect();
        }

        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            created_at: chrono::Utc::now().to_rfc3339(),
            root: root.to_string(),
            layout: tree.levels().to_vec(),
            expanded_depth: tree.expanded_depth(),
            level_counts: levels.iter().map(Vec::len).collect(),
            levels,
            tool: format!("ccmi-inv/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Rebuilds the tree bottom-up, handing each parent the next `children`
    /// entries of the depth below it.
    pub fn into_tree(self) -> Result<ArchiveTree, InventoryError> {
        self.validate()?;
        let mut below: Vec<Node> = Vec::new();
        for (depth, entries) in self.levels.iter().enumerate().rev() {
            let kind = self.layout[depth];
            let mut remaining = below.into_iter();
            let mut current = Vec::with_capacity(entries.len());
            for entry in entries {
                let children: Vec<Node> = remaining.by_ref().take(entry.children).collect();
                if children.len() != entry.children {
                    return Err(InventoryError::Snapshot(format!(
                        "node {} at depth {depth} claims {} children but only {} remain",
                        entry.name,
                        entry.children,
                        children.len()
                    )));
                }
                current.push(Node {
                    kind,
                    name: entry.name.clone(),
                    resource: entry.resource.clone(),
                    children,
                });
            }
            if remaining.next().is_some() {
                return Err(InventoryError::Snapshot(format!(
                    "depth {} has entries not owned by any parent",
                    depth + 1
                )));
            }
            below = current;
        }
        Ok(ArchiveTree::new(self.layout, below, self.expanded_depth))
    }

    fn validate(&self) -> Result<(), InventoryError> {
        if self.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(InventoryError::Snapshot(format!(
                "unsupported snapshot schema version {}",
                self.schema_version
            )));
        }
        if self.expanded_depth > self.layout.len() || self.levels.len() != self.expanded_depth {
            return Err(InventoryError::Snapshot(format!(
                "snapshot lists {} levels but claims an expanded depth of {}",
                self.levels.len(),
                self.expanded_depth
            )));
        }
        if self.level_counts.len() != self.levels.len()
            || self
                .level_counts
                .iter()
                .zip(&self.levels)
                .any(|(count, entries)| *count != entries.len())
        {
            return Err(InventoryError::Snapshot(
                "level counts do not match the stored entries".to_string(),
            ));
        }
        // Files carry their remote path; containers never do.
        for (depth, entries) in self.levels.iter().enumerate() {
            let is_file_level = self.layout[depth] == LevelKind::File;
            if let Some(entry) = entries
                .iter()
                .find(|entry| entry.resource.is_some() != is_file_level)
            {
                return Err(InventoryError::Snapshot(format!(
                    "entry {} at depth {depth} ({}) {} a resource",
                    entry.name,
                    self.layout[depth],
                    if is_file_level { "is missing" } else { "must not carry" }
                )));
            }
        }
        Ok(())
    }

    pub fn persist(&self, store: &Store, label: &str) -> Result<Utf8PathBuf, InventoryError> {
        let path = store.snapshot_path(label, &chrono::Utc::now());
        let content = serde_json::to_vec_pretty(self)
            .map_err(|err| InventoryError::Snapshot(err.to_string()))?;
        Store::write_bytes_atomic(&path, &content)?;
        Ok(path)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, InventoryError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| InventoryError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| InventoryError::Snapshot(format!("parse {path}: {err}")))
    }
}
