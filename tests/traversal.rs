use std::collections::HashMap;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use ccmi_inventory::builder::TreeBuilder;
use ccmi_inventory::domain::{Filter, LevelKind};
use ccmi_inventory::error::InventoryError;
use ccmi_inventory::lister::{DirectoryLister, ListingEntry, RemotePath, Retrying};
use ccmi_inventory::output::JsonOutput;
use ccmi_inventory::search::TreeSearcher;
use ccmi_inventory::snapshot::InventorySnapshot;
use ccmi_inventory::store::Store;

/// In-memory archive keyed by `/`-joined paths; unknown paths fail to list.
#[derive(Default)]
struct StubArchive {
    containers: HashMap<String, Vec<String>>,
    files: HashMap<String, Vec<String>>,
    calls: Mutex<Vec<String>>,
}

impl StubArchive {
    fn dir(mut self, path: &str, children: &[&str]) -> Self {
        self.containers.insert(
            path.to_string(),
            children.iter().map(|child| child.to_string()).collect(),
        );
        self
    }

    fn leaf(mut self, path: &str, names: &[&str]) -> Self {
        self.files.insert(
            path.to_string(),
            names.iter().map(|name| format!("{path}/{name}")).collect(),
        );
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, path: &RemotePath) -> String {
        let key = path.to_string();
        self.calls.lock().unwrap().push(key.clone());
        key
    }
}

impl DirectoryLister for StubArchive {
    fn list(&self, path: &RemotePath) -> Result<Vec<ListingEntry>, InventoryError> {
        let key = self.record(path);
        self.containers
            .get(&key)
            .map(|names| names.iter().map(|name| ListingEntry::container(name.as_str())).collect())
            .ok_or_else(|| InventoryError::Listing {
                container: key,
                message: "404".to_string(),
            })
    }

    fn list_files(&self, path: &RemotePath) -> Result<Vec<String>, InventoryError> {
        let key = self.record(path);
        self.files
            .get(&key)
            .cloned()
            .ok_or_else(|| InventoryError::Listing {
                container: key,
                message: "404".to_string(),
            })
    }

    fn describe(&self, path: &RemotePath) -> String {
        format!("stub://{path}")
    }
}

fn levels() -> Vec<LevelKind> {
    vec![
        LevelKind::Institution,
        LevelKind::Model,
        LevelKind::Experiment,
        LevelKind::File,
    ]
}

fn scenario() -> StubArchive {
    StubArchive::default()
        .dir("", &["InstA", "InstB"])
        .dir("InstA", &["ModelA"])
        .dir("InstB", &["ModelB"])
        .dir("InstA/ModelA", &["refC1", "refC2"])
        .dir("InstB/ModelB", &["refC1"])
        .leaf("InstA/ModelA/refC1", &["o3_mon_ModelA_refC1_r1i1p1_1960-2010.nc"])
        .leaf("InstA/ModelA/refC2", &["o3_mon_ModelA_refC2_r1i1p1_1960-2100.nc"])
        .leaf("InstB/ModelB/refC1", &["o3_mon_ModelB_refC1_r1i1p1_1960-2010.nc"])
}

fn refc1() -> Filter {
    Filter::new().with(LevelKind::Experiment, ["refC1"])
}

#[test]
fn builder_counts_every_level() {
    let archive = scenario();
    let levels = levels();
    let tree = TreeBuilder::new(&archive, &levels)
        .build(&JsonOutput)
        .unwrap();

    assert!(tree.is_complete());
    assert_eq!(tree.level_counts(), vec![2, 2, 3, 3]);
    assert_eq!(tree.names_at(LevelKind::Experiment), vec!["refC1", "refC2"]);
    // Every level is finished before the next one starts.
    assert_eq!(
        archive.calls(),
        vec![
            "",
            "InstA",
            "InstB",
            "InstA/ModelA",
            "InstB/ModelB",
            "InstA/ModelA/refC1",
            "InstA/ModelA/refC2",
            "InstB/ModelB/refC1",
        ]
    );
}

#[test]
fn live_search_never_lists_rejected_branches() {
    let archive = scenario();
    let levels = levels();
    let filter = refc1();
    let outcome = TreeSearcher::new(&archive, &levels, &filter)
        .search_live(&JsonOutput)
        .unwrap();

    assert_eq!(
        outcome.files,
        vec![
            "InstA/ModelA/refC1/o3_mon_ModelA_refC1_r1i1p1_1960-2010.nc",
            "InstB/ModelB/refC1/o3_mon_ModelB_refC1_r1i1p1_1960-2010.nc",
        ]
    );
    assert_eq!(outcome.pruned, 1);
    assert_eq!(outcome.listings, 7);
    assert!(archive.calls().iter().all(|call| !call.contains("refC2")));
}

#[test]
fn cached_search_matches_live_without_listing() {
    let levels = levels();
    let tree = TreeBuilder::new(&scenario(), &levels)
        .build(&JsonOutput)
        .unwrap();

    let archive = scenario();
    let filter = refc1();
    let searcher = TreeSearcher::new(&archive, &levels, &filter);
    let cached = searcher.search_cached(&tree, &JsonOutput).unwrap();
    assert_eq!(cached.listings, 0);
    assert!(archive.calls().is_empty());

    let live = searcher.search_live(&JsonOutput).unwrap();
    assert_eq!(cached.files, live.files);
}

#[test]
fn cached_search_continues_live_below_expanded_depth() {
    let levels = levels();
    let tree = TreeBuilder::new(&scenario(), &levels)
        .with_max_depth(Some(2))
        .build(&JsonOutput)
        .unwrap();
    assert_eq!(tree.expanded_depth(), 2);
    assert!(!tree.is_complete());

    let archive = scenario();
    let filter = refc1();
    let outcome = TreeSearcher::new(&archive, &levels, &filter)
        .search_cached(&tree, &JsonOutput)
        .unwrap();

    assert_eq!(outcome.files.len(), 2);
    assert_eq!(
        archive.calls(),
        vec![
            "InstA/ModelA",
            "InstA/ModelA/refC1",
            "InstB/ModelB",
            "InstB/ModelB/refC1",
        ]
    );
}

#[test]
fn unreachable_root_is_fatal_after_retries() {
    let archive = StubArchive::default();
    let lister = Retrying::new(&archive, 5);
    let levels = levels();

    let result = TreeBuilder::new(&lister, &levels).build(&JsonOutput);
    assert_matches!(result, Err(InventoryError::RootListing { .. }));
    assert_eq!(archive.calls().len(), 5);

    let filter = refc1();
    let result = TreeSearcher::new(&lister, &levels, &filter).search_live(&JsonOutput);
    assert_matches!(result, Err(InventoryError::RootListing { root, .. }) if root == "stub://");
}

#[test]
fn failing_branch_becomes_empty() {
    let mut archive = scenario();
    archive.containers.remove("InstB");
    let lister = Retrying::new(&archive, 3);
    let levels = levels();

    let tree = TreeBuilder::new(&lister, &levels).build(&JsonOutput).unwrap();
    assert_eq!(tree.level_counts(), vec![2, 1, 2, 2]);
    assert_eq!(
        archive.calls().iter().filter(|call| *call == "InstB").count(),
        3
    );

    let filter = refc1();
    let outcome = TreeSearcher::new(&lister, &levels, &filter)
        .search_live(&JsonOutput)
        .unwrap();
    assert_eq!(
        outcome.files,
        vec!["InstA/ModelA/refC1/o3_mon_ModelA_refC1_r1i1p1_1960-2010.nc"]
    );
}

#[test]
fn only_latest_version_is_followed() {
    let archive = StubArchive::default()
        .dir("", &["CMAM"])
        .dir("CMAM", &["v1", "v10", "v2"])
        .leaf("CMAM/v10", &["ta.nc"]);
    let levels = vec![LevelKind::Model, LevelKind::Version, LevelKind::File];
    let filter = Filter::new();

    let outcome = TreeSearcher::new(&archive, &levels, &filter)
        .search_live(&JsonOutput)
        .unwrap();
    assert_eq!(outcome.files, vec!["CMAM/v10/ta.nc"]);
    assert_eq!(outcome.pruned, 2);
    assert_eq!(archive.calls(), vec!["", "CMAM", "CMAM/v10"]);
}

#[test]
fn persisted_snapshot_reloads_to_the_same_tree() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new_with_root(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap());
    let levels = levels();
    let tree = TreeBuilder::new(&scenario(), &levels)
        .build(&JsonOutput)
        .unwrap();

    let written = InventorySnapshot::from_tree(&tree, "stub://")
        .persist(&store, "CCMI-1")
        .unwrap();
    let latest = store.latest_snapshot("CCMI-1").unwrap();
    assert_eq!(latest.as_ref(), Some(&written));

    let reloaded = InventorySnapshot::load(&written).unwrap();
    assert_eq!(reloaded.level_counts, vec![2, 2, 3, 3]);
    assert_eq!(reloaded.into_tree().unwrap(), tree);
}
