use serde::Serialize;

use crate::domain::LevelKind;
use crate::lister::RemotePath;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub kind: LevelKind,
    pub name: String,
    /// Remote file path for `File` nodes; containers have none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn container(kind: LevelKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            resource: None,
            children: Vec::new(),
        }
    }

    pub fn file(name: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            kind: LevelKind::File,
            name: name.into(),
            resource: Some(resource.into()),
            children: Vec::new(),
        }
    }
}

/// The discovered part of an archive: one `LevelKind` per depth, the nodes of
/// depth 0 as roots, and how many depths were actually listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveTree {
    levels: Vec<LevelKind>,
    roots: Vec<Node>,
    expanded_depth: usize,
}

impl ArchiveTree {
    pub fn new(levels: Vec<LevelKind>, roots: Vec<Node>, expanded_depth: usize) -> Self {
        let expanded_depth = expanded_depth.min(levels.len());
        Self {
            levels,
            roots,
            expanded_depth,
        }
    }

    pub fn levels(&self) -> &[LevelKind] {
        &self.levels
    }

    pub fn roots(&self) -> &[Node] {
        &self.roots
    }

    /// Number of depths whose listings are reflected in the tree. Nodes at
    /// `expanded_depth - 1` have children that were never listed.
    pub fn expanded_depth(&self) -> usize {
        self.expanded_depth
    }

    pub fn is_complete(&self) -> bool {
        self.expanded_depth == self.levels.len()
    }

    /// Node counts per depth, up to the expanded depth.
    pub fn level_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.expanded_depth];
        let mut frontier: Vec<&Node> = self.roots.iter().collect();
        let mut depth = 0usize;
        while !frontier.is_empty() && depth < counts.len() {
            counts[depth] = frontier.len();
            frontier = frontier
                .into_iter()
                .flat_map(|node| node.children.iter())
                .collect();
            depth += 1;
        }
        counts
    }

    pub fn file_count(&self) -> usize {
        self.files().len()
    }

    /// Remote paths of every file node, in tree order.
    pub fn files(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for root in &self.roots {
            collect_files(root, &mut out);
        }
        out
    }

    /// Distinct names seen at the given level, in first-seen order.
    pub fn names_at(&self, kind: LevelKind) -> Vec<&str> {
        let Some(depth) = self.levels.iter().position(|level| *level == kind) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = Vec::new();
        visit_depth(&self.roots, depth, &mut |node| {
            if !names.contains(&node.name.as_str()) {
                names.push(node.name.as_str());
            }
        });
        names
    }

    /// Mutable handles to every node at `depth`, with their remote paths.
    pub fn frontier_mut(&mut self, depth: usize) -> Vec<(RemotePath, &mut Node)> {
        let mut out = Vec::new();
        collect_frontier(&mut self.roots, depth, &RemotePath::root(), &mut out);
        out
    }

    pub fn mark_expanded(&mut self, depth: usize) {
        self.expanded_depth = depth.min(self.levels.len());
    }
}

fn collect_files<'a>(node: &'a Node, out: &mut Vec<&'a str>) {
    if let Some(resource) = node.resource.as_deref() {
        out.push(resource);
    }
    for child in &node.children {
        collect_files(child, out);
    }
}

fn visit_depth<'a, F: FnMut(&'a Node)>(nodes: &'a [Node], depth: usize, visit: &mut F) {
    for node in nodes {
        if depth == 0 {
            visit(node);
        } else {
            visit_depth(&node.children, depth - 1, visit);
        }
    }
}

fn collect_frontier<'a>(
    nodes: &'a mut [Node],
    depth: usize,
    parent: &RemotePath,
    out: &mut Vec<(RemotePath, &'a mut Node)>,
) {
    for node in nodes.iter_mut() {
        let path = parent.join(&node.name);
        if depth == 0 {
            out.push((path, node));
        } else {
            collect_frontier(&mut node.children, depth - 1, &path, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ArchiveTree {
        let mut inst_a = Node::container(LevelKind::Institution, "InstA");
        let mut model_a = Node::container(LevelKind::Model, "ModelA");
        model_a.children.push(Node::container(LevelKind::Experiment, "refC1"));
        model_a.children.push(Node::container(LevelKind::Experiment, "refC2"));
        inst_a.children.push(model_a);

        let mut inst_b = Node::container(LevelKind::Institution, "InstB");
        let mut model_b = Node::container(LevelKind::Model, "ModelB");
        model_b.children.push(Node::container(LevelKind::Experiment, "refC1"));
        inst_b.children.push(model_b);

        ArchiveTree::new(
            vec![LevelKind::Institution, LevelKind::Model, LevelKind::Experiment],
            vec![inst_a, inst_b],
            3,
        )
    }

    #[test]
    fn counts_per_level() {
        assert_eq!(sample().level_counts(), vec![2, 2, 3]);
    }

    #[test]
    fn distinct_names_at_level() {
        assert_eq!(sample().names_at(LevelKind::Experiment), vec!["refC1", "refC2"]);
        assert!(sample().names_at(LevelKind::Version).is_empty());
    }

    #[test]
    fn frontier_paths() {
        let mut tree = sample();
        let paths: Vec<String> = tree
            .frontier_mut(2)
            .into_iter()
            .map(|(path, _)| path.to_string())
            .collect();
        assert_eq!(
            paths,
            vec!["InstA/ModelA/refC1", "InstA/ModelA/refC2", "InstB/ModelB/refC1"]
        );
    }
}
