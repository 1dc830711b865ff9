use disk_catalog_core::analysis::{MatchKind, SafetyClass, VolumeRole};
use disk_catalog_core::{
    AppConfig, Catalog, ChangeNotification, JobOutcome, SilentReporter, VolumeEvent, VolumeState,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

const TIMEOUT: Duration = Duration::from_secs(30);
const TWO_MB: usize = 2 * 1024 * 1024;

fn write_file(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn attach(id: &str, root: &Path) -> VolumeEvent {
    VolumeEvent {
        volume_id: id.to_string(),
        name: format!("Disk {}", id),
        mount_path: root.to_path_buf(),
        total_capacity: 1 << 30,
        available_capacity: 1 << 29,
        is_connected: true,
    }
}

fn detach(id: &str, root: &Path) -> VolumeEvent {
    VolumeEvent {
        is_connected: false,
        ..attach(id, root)
    }
}

fn config(dir: &TempDir) -> AppConfig {
    AppConfig {
        database_path: dir.path().join("catalog.db").to_string_lossy().into_owned(),
        ..AppConfig::default()
    }
}

fn db_path(config: &AppConfig) -> PathBuf {
    PathBuf::from(&config.database_path)
}

fn open(config: &AppConfig) -> Catalog {
    Catalog::open(config, Arc::new(SilentReporter)).unwrap()
}

#[test]
fn test_attach_index_hash_search_and_duplicates() {
    let db_dir = tempdir().unwrap();
    let vol_a = tempdir().unwrap();
    let vol_b = tempdir().unwrap();
    let photo = vec![42u8; TWO_MB];
    write_file(vol_a.path(), "Pictures/photo.jpg", &photo);
    write_file(vol_a.path(), "notes.txt", b"a");
    write_file(vol_b.path(), "Backup/photo.jpg", &photo);

    let catalog = open(&config(&db_dir));
    catalog.handle_volume_event(&attach("A", vol_a.path())).unwrap();
    catalog.handle_volume_event(&attach("B", vol_b.path())).unwrap();
    assert!(catalog.coordinator().wait_idle(None, TIMEOUT));

    let hits = catalog.search("photo", 10, 0).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.is_connected && !h.is_directory));

    let roles: HashMap<String, VolumeRole> = [
        ("A".to_string(), VolumeRole::Source),
        ("B".to_string(), VolumeRole::Backup),
    ]
    .into_iter()
    .collect();
    let groups = catalog.duplicate_groups(&roles).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "photo.jpg");
    assert_eq!(groups[0].count(), 2);
    assert_eq!(groups[0].match_kind, MatchKind::ContentHash);
    assert_eq!(groups[0].safety, SafetyClass::HasBackup);
}

#[test]
fn test_detached_volume_stays_searchable_offline() {
    let db_dir = tempdir().unwrap();
    let vol = tempdir().unwrap();
    write_file(vol.path(), "finance/Invoice_2024.pdf", b"pdf");
    write_file(vol.path(), "archive/invoices_archive.zip", b"zip");
    write_file(vol.path(), "finance/report.pdf", b"pdf");

    let catalog = open(&config(&db_dir));
    catalog.handle_volume_event(&attach("V1", vol.path())).unwrap();
    assert!(catalog.coordinator().wait_idle(None, TIMEOUT));
    catalog.handle_volume_event(&detach("V1", vol.path())).unwrap();

    let hits = catalog.search("invoice", 10, 0).unwrap();
    let mut names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["Invoice_2024.pdf", "invoices_archive.zip"]);
    assert!(hits.iter().all(|h| !h.is_connected));

    let finance = catalog.get_children("V1", "finance").unwrap();
    assert_eq!(finance.len(), 2);
}

#[test]
fn test_excluded_volume_is_not_indexed_on_attach() {
    let db_dir = tempdir().unwrap();
    let vol = tempdir().unwrap();
    write_file(vol.path(), "a.txt", b"a");

    let catalog = open(&config(&db_dir));
    catalog.handle_volume_event(&attach("V1", vol.path())).unwrap();
    assert!(catalog.coordinator().wait_idle(None, TIMEOUT));
    catalog.tracker().exclude_volume("V1").unwrap();

    write_file(vol.path(), "b.txt", b"b");
    catalog.handle_volume_event(&detach("V1", vol.path())).unwrap();
    catalog.handle_volume_event(&attach("V1", vol.path())).unwrap();
    assert!(!catalog.coordinator().is_indexing(Some("V1")));
    assert_eq!(catalog.store().count_files(Some("V1")).unwrap(), 1);

    catalog.tracker().unexclude_volume("V1").unwrap();
    catalog.handle_volume_event(&attach("V1", vol.path())).unwrap();
    assert!(catalog.coordinator().wait_idle(None, TIMEOUT));
    assert_eq!(catalog.store().count_files(Some("V1")).unwrap(), 2);
}

#[test]
fn test_change_signal_runs_delta_scan() {
    let db_dir = tempdir().unwrap();
    let vol = tempdir().unwrap();
    write_file(vol.path(), "one.txt", b"1");

    let catalog = open(&config(&db_dir));
    catalog.handle_volume_event(&attach("V1", vol.path())).unwrap();
    assert!(catalog.coordinator().wait_idle(None, TIMEOUT));

    write_file(vol.path(), "two.txt", b"2");
    fs::remove_file(vol.path().join("one.txt")).unwrap();
    catalog
        .handle_change(&ChangeNotification {
            volume_id: "V1".to_string(),
            changed_path_count: 2,
        })
        .unwrap();
    assert!(catalog.coordinator().wait_idle(None, TIMEOUT));

    match catalog.coordinator().last_outcome("V1") {
        Some(JobOutcome::Completed(summary)) => {
            assert_eq!(summary.inserted, 1);
            assert_eq!(summary.deleted, 1);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(catalog.search("two", 10, 0).unwrap().len(), 1);
    assert!(catalog.search("one", 10, 0).unwrap().is_empty());
}

#[test]
fn test_volume_states_after_reopen() {
    let db_dir = tempdir().unwrap();
    let vol_a = tempdir().unwrap();
    let vol_b = tempdir().unwrap();
    let vol_c = tempdir().unwrap();
    let config = config(&db_dir);
    {
        let catalog = open(&config);
        catalog.handle_volume_event(&attach("A", vol_a.path())).unwrap();
        catalog.handle_volume_event(&attach("B", vol_b.path())).unwrap();
        assert!(catalog.coordinator().wait_idle(None, TIMEOUT));
    }

    let catalog = open(&config);
    let statuses = catalog
        .tracker()
        .load_volumes(&[attach("A", vol_a.path()), attach("C", vol_c.path())])
        .unwrap();
    let states: HashMap<String, VolumeState> = statuses
        .iter()
        .map(|s| (s.volume.id.clone(), s.state))
        .collect();
    assert_eq!(states["A"], VolumeState::Online);
    assert_eq!(states["B"], VolumeState::Offline);
    assert_eq!(states["C"], VolumeState::New);
    assert!(catalog.tracker().is_connected("A"));
    assert!(!catalog.tracker().is_connected("B"));
    assert_eq!(
        catalog.tracker().mount_path("C").as_deref(),
        Some(vol_c.path())
    );

    // Mounted volumes are indexed without a separate attach event.
    assert!(catalog.coordinator().wait_idle(None, TIMEOUT));
    assert!(catalog.coordinator().last_outcome("C").unwrap().is_completed());
    assert!(catalog.coordinator().last_outcome("B").is_none());
    let c = catalog.store().get_volume("C").unwrap().unwrap();
    assert!(c.last_scan_at.is_some());
}

#[test]
fn test_reload_skips_excluded_volumes() {
    let db_dir = tempdir().unwrap();
    let vol = tempdir().unwrap();
    write_file(vol.path(), "a.txt", b"a");
    let config = config(&db_dir);
    {
        let catalog = open(&config);
        catalog.handle_volume_event(&attach("V1", vol.path())).unwrap();
        assert!(catalog.coordinator().wait_idle(None, TIMEOUT));
        catalog.tracker().exclude_volume("V1").unwrap();
    }

    write_file(vol.path(), "b.txt", b"b");
    let catalog = open(&config);
    let statuses = catalog
        .tracker()
        .load_volumes(&[attach("V1", vol.path())])
        .unwrap();
    assert_eq!(statuses[0].state, VolumeState::Online);
    assert!(catalog.coordinator().wait_idle(None, TIMEOUT));
    assert!(catalog.coordinator().last_outcome("V1").is_none());
    assert_eq!(catalog.store().count_files(Some("V1")).unwrap(), 1);
}

#[test]
fn test_delete_volume_removes_it_from_search() {
    let db_dir = tempdir().unwrap();
    let vol = tempdir().unwrap();
    write_file(vol.path(), "holiday.mov", b"m");

    let catalog = open(&config(&db_dir));
    catalog.handle_volume_event(&attach("V1", vol.path())).unwrap();
    assert!(catalog.coordinator().wait_idle(None, TIMEOUT));
    assert_eq!(catalog.tracker().delete_volume("V1").unwrap(), 1);

    assert!(catalog.search("holiday", 10, 0).unwrap().is_empty());
    assert!(catalog.store().list_volumes().unwrap().is_empty());
    assert!(!catalog.tracker().is_connected("V1"));
}

#[test]
fn test_settings_persist_and_disable_duplicates() {
    let db_dir = tempdir().unwrap();
    let vol_a = tempdir().unwrap();
    let vol_b = tempdir().unwrap();
    write_file(vol_a.path(), "same.bin", b"same");
    write_file(vol_b.path(), "same.bin", b"same");
    let config = config(&db_dir);
    {
        let catalog = open(&config);
        let mut settings = catalog.settings();
        settings.duplicate_detection_enabled = false;
        catalog.update_settings(settings).unwrap();
    }

    let catalog = open(&config);
    assert!(!catalog.settings().duplicate_detection_enabled);
    catalog.handle_volume_event(&attach("A", vol_a.path())).unwrap();
    catalog.handle_volume_event(&attach("B", vol_b.path())).unwrap();
    assert!(catalog.coordinator().wait_idle(None, TIMEOUT));

    assert!(catalog.duplicate_groups(&HashMap::new()).unwrap().is_empty());
    assert!(catalog.coordinator().last_hash_outcome("A").is_none());
}

#[test]
fn test_deleted_database_is_recovered_on_next_operation() {
    let db_dir = tempdir().unwrap();
    let vol = tempdir().unwrap();
    write_file(vol.path(), "keep.txt", b"k");
    let config = config(&db_dir);

    let catalog = open(&config);
    catalog.handle_volume_event(&attach("V1", vol.path())).unwrap();
    assert!(catalog.coordinator().wait_idle(None, TIMEOUT));

    fs::remove_file(db_path(&config)).unwrap();
    catalog.handle_volume_event(&attach("V1", vol.path())).unwrap();
    assert!(catalog.coordinator().wait_idle(None, TIMEOUT));

    assert_eq!(catalog.store().recovery_count(), 1);
    assert!(db_path(&config).exists());
    assert!(catalog.coordinator().last_outcome("V1").unwrap().is_completed());
    assert_eq!(catalog.search("keep", 10, 0).unwrap().len(), 1);
}
