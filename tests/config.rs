use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use ccmi_inventory::config::ConfigLoader;
use ccmi_inventory::domain::{ArchiveLayout, LevelKind, Protocol};
use ccmi_inventory::error::InventoryError;

#[test]
fn resolve_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ccmi-inventory.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "layout": "ccmi2022",
            "experiments": ["refD1", "refD2"],
            "targets": ["h2o_AmonZ", "o3_AmonZ"],
            "filter": {"ensemble": ["r1i1p1f1"]},
            "overwrite_existing": true,
            "download_root": "/data/ccmi",
            "max_retries_per_listing": 3,
            "retry_delay_ms": 250,
            "inventory_depth": 4,
            "max_failure_ratio": 0.1
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.layout, ArchiveLayout::Ccmi2022);
    assert_eq!(resolved.protocol, Protocol::Thredds);
    assert_eq!(resolved.levels.len(), 9);
    assert!(resolved.overwrite_existing);
    assert_eq!(resolved.download_root.as_str(), "/data/ccmi");
    assert_eq!(resolved.max_retries_per_listing, 3);
    assert_eq!(resolved.retry_delay, Duration::from_millis(250));
    assert_eq!(resolved.inventory_depth, Some(4));

    let filter = &resolved.filter;
    assert!(filter.accepts(LevelKind::Experiment, "refD2"));
    assert!(!filter.accepts(LevelKind::Experiment, "refD1-SD"));
    assert!(filter.accepts(LevelKind::Variable, "h2o"));
    assert!(filter.accepts(LevelKind::Table, "AmonZ"));
    assert!(!filter.accepts(LevelKind::Table, "Amon"));
    assert!(filter.accepts(LevelKind::Ensemble, "r1i1p1f1"));
    assert!(filter.accepts(LevelKind::GridLabel, "anything"));
}

#[test]
fn explicit_missing_file_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(InventoryError::ConfigRead(_))
    );
}

#[test]
fn unknown_filter_level_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.json");
    fs::write(&path, r#"{"filter": {"planet": ["earth"]}}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(InventoryError::InvalidLevel(_))
    );

    fs::write(&path, r#"{"layout": "ccmi3"}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(InventoryError::ConfigParse(_))
    );
}
