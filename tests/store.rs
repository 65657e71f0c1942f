use std::fs;

use camino::Utf8PathBuf;

use ccmi_inventory::store::Store;

fn store(temp: &tempfile::TempDir) -> Store {
    Store::new_with_root(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap())
}

#[test]
fn latest_snapshot_follows_the_name_timestamp() {
    let temp = tempfile::tempdir().unwrap();
    let store = store(&temp);
    let dir = store.inventory_dir();
    fs::create_dir_all(&dir).unwrap();
    for name in [
        "CCMI-1_archive_202312312359.json",
        "CCMI-1_archive_202401010000.json",
        "CCMI-1_archive_20240101.json",
        "CCMI-2022_archive_202501010000.json",
        "CCMI-1_archive_202413010000.json",
        "notes.txt",
    ] {
        fs::write(dir.join(name), b"{}").unwrap();
    }

    assert_eq!(
        store.latest_snapshot("CCMI-1").unwrap(),
        Some(dir.join("CCMI-1_archive_202401010000.json"))
    );
    assert_eq!(
        store.latest_snapshot("CCMI-2022").unwrap(),
        Some(dir.join("CCMI-2022_archive_202501010000.json"))
    );
}

#[test]
fn no_snapshot_without_inventory_dir() {
    let temp = tempfile::tempdir().unwrap();
    assert_eq!(store(&temp).latest_snapshot("CCMI-1").unwrap(), None);
}

#[test]
fn search_log_is_written_twice() {
    let temp = tempfile::tempdir().unwrap();
    let store = store(&temp);
    let files = vec![
        "badc/ccmi/a/o3_AmonZ_M_refD1_r1_gnz_2000.nc".to_string(),
        "badc/ccmi/b/o3_AmonZ_M_refD2_r1_gnz_2000.nc".to_string(),
    ];

    let stamped = store.write_search_log("CCMI-2022", &files).unwrap();
    let name = stamped.file_name().unwrap();
    assert!(name.starts_with("CCMI-2022_search_"));
    assert!(name.ends_with(".log"));

    let expected = format!("{}\n{}\n", files[0], files[1]);
    assert_eq!(fs::read_to_string(&stamped).unwrap(), expected);
    assert_eq!(
        fs::read_to_string(store.latest_search_log_path("CCMI-2022")).unwrap(),
        expected
    );
}

#[test]
fn ensure_root_creates_missing_state_dir() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("state").join("ccmi")).unwrap();
    let store = Store::new_with_root(root.clone());

    store.ensure_root().unwrap();
    assert!(root.as_std_path().is_dir());
    // Already present is fine.
    store.ensure_root().unwrap();
    assert_eq!(store.latest_snapshot("CCMI-1").unwrap(), None);
}
