use disk_catalog_core::analysis::{
    summarize, DuplicateAnalyzer, MatchKind, SafetyClass, VolumeRole,
};
use disk_catalog_core::storage::models::{FileEntry, HashUpdate, VolumeInfo};
use disk_catalog_core::Store;
use std::collections::HashMap;
use std::sync::Arc;

const TWO_MB: i64 = 2 * 1024 * 1024;

fn entry(path: &str, size: i64) -> FileEntry {
    let (parent, name) = path.rsplit_once('/').unwrap_or(("", path));
    FileEntry {
        relative_path: path.to_string(),
        parent_path: parent.to_string(),
        name: name.to_string(),
        extension: name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()),
        size,
        created_at: None,
        modified_at: 1_700_000_000_000,
        is_directory: false,
    }
}

fn setup(volumes: &[&str]) -> Arc<Store> {
    let store = Arc::new(Store::open_in_memory().unwrap());
    for id in volumes {
        store
            .upsert_volume(&VolumeInfo {
                id: id.to_string(),
                name: format!("Volume {}", id),
                total_capacity: 0,
                available_capacity: 0,
            })
            .unwrap();
    }
    store
}

fn set_hash(store: &Store, volume_id: &str, path: &str, hash: i64) {
    let record = store.get_file(volume_id, path).unwrap().unwrap();
    store
        .update_hashes_batch(&[HashUpdate {
            id: record.id,
            content_hash: hash,
            duplicate_key: format!("{}:{:016x}", record.size, hash),
        }])
        .unwrap();
}

fn roles(pairs: &[(&str, VolumeRole)]) -> HashMap<String, VolumeRole> {
    pairs
        .iter()
        .map(|(id, role)| (id.to_string(), *role))
        .collect()
}

#[test]
fn test_same_name_and_size_on_two_volumes_is_one_group() {
    let store = setup(&["A", "B"]);
    store
        .insert_files_batch("A", &[entry("pictures/photo.jpg", TWO_MB)])
        .unwrap();
    store
        .insert_files_batch("B", &[entry("backup/photo.jpg", TWO_MB)])
        .unwrap();

    let groups = DuplicateAnalyzer::new(store)
        .get_duplicate_groups(&HashMap::new())
        .unwrap();
    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.name, "photo.jpg");
    assert_eq!(group.size, TWO_MB);
    assert_eq!(group.count(), 2);
    assert_eq!(group.match_kind, MatchKind::NameSize);
    assert_eq!(group.volume_ids, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(group.safety, SafetyClass::Unclassified);
    assert_eq!(group.wasted_bytes(), TWO_MB);
}

#[test]
fn test_single_volume_copies_are_not_reported() {
    let store = setup(&["A", "B"]);
    store
        .insert_files_batch("A", &[entry("a/photo.jpg", TWO_MB), entry("b/photo.jpg", TWO_MB)])
        .unwrap();
    store
        .insert_files_batch("B", &[entry("photo.jpg", TWO_MB + 1)])
        .unwrap();

    let groups = DuplicateAnalyzer::new(store)
        .get_duplicate_groups(&HashMap::new())
        .unwrap();
    assert!(groups.is_empty());
}

#[test]
fn test_directories_never_form_groups() {
    let store = setup(&["A", "B"]);
    let dir = FileEntry {
        is_directory: true,
        extension: None,
        ..entry("Photos", 0)
    };
    store.insert_files_batch("A", &[dir.clone()]).unwrap();
    store.insert_files_batch("B", &[dir]).unwrap();

    let groups = DuplicateAnalyzer::new(store)
        .get_duplicate_groups(&HashMap::new())
        .unwrap();
    assert!(groups.is_empty());
}

#[test]
fn test_content_hashes_split_name_size_matches() {
    let store = setup(&["A", "B", "C"]);
    store.insert_files_batch("A", &[entry("movie.mkv", 500)]).unwrap();
    store.insert_files_batch("B", &[entry("movie.mkv", 500)]).unwrap();
    store.insert_files_batch("C", &[entry("movie.mkv", 500)]).unwrap();
    set_hash(&store, "A", "movie.mkv", 11);
    set_hash(&store, "B", "movie.mkv", 11);
    set_hash(&store, "C", "movie.mkv", 22);

    let groups = DuplicateAnalyzer::new(store)
        .get_duplicate_groups(&HashMap::new())
        .unwrap();
    // The lone hash-22 copy on C has nothing to pair with.
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].match_kind, MatchKind::ContentHash);
    assert_eq!(groups[0].content_hash, Some(11));
    assert_eq!(groups[0].volume_ids, vec!["A".to_string(), "B".to_string()]);
}

#[test]
fn test_unhashed_copies_stay_candidates_in_every_partition() {
    let store = setup(&["A", "B", "C"]);
    for volume in ["A", "B", "C"] {
        store.insert_files_batch(volume, &[entry("song.flac", 900)]).unwrap();
    }
    set_hash(&store, "A", "song.flac", 1);
    set_hash(&store, "B", "song.flac", 2);

    let groups = DuplicateAnalyzer::new(store)
        .get_duplicate_groups(&HashMap::new())
        .unwrap();
    assert_eq!(groups.len(), 2);
    for group in &groups {
        assert_eq!(group.match_kind, MatchKind::NameSize);
        assert_eq!(group.count(), 2);
        assert!(group.volume_ids.contains(&"C".to_string()));
    }
}

#[test]
fn test_safety_classification_uses_caller_roles() {
    let store = setup(&["src1", "src2", "bak1", "bak2"]);
    store.insert_files_batch("src1", &[entry("a.doc", 10), entry("b.doc", 20)]).unwrap();
    store.insert_files_batch("src2", &[entry("b.doc", 20)]).unwrap();
    store.insert_files_batch("bak1", &[entry("a.doc", 10), entry("c.doc", 30)]).unwrap();
    store.insert_files_batch("bak2", &[entry("c.doc", 30)]).unwrap();
    let roles = roles(&[
        ("src1", VolumeRole::Source),
        ("src2", VolumeRole::Source),
        ("bak1", VolumeRole::Backup),
        ("bak2", VolumeRole::Backup),
    ]);

    let groups = DuplicateAnalyzer::new(store)
        .get_duplicate_groups(&roles)
        .unwrap();
    let safety: HashMap<&str, SafetyClass> =
        groups.iter().map(|g| (g.name.as_str(), g.safety)).collect();
    assert_eq!(safety["a.doc"], SafetyClass::HasBackup);
    assert_eq!(safety["b.doc"], SafetyClass::RedundantSources);
    assert_eq!(safety["c.doc"], SafetyClass::BackupOnly);

    // Largest files first.
    let sizes: Vec<i64> = groups.iter().map(|g| g.size).collect();
    assert_eq!(sizes, vec![30, 20, 10]);
}

#[test]
fn test_summary_counts_reclaimable_bytes() {
    let store = setup(&["A", "B", "C"]);
    for volume in ["A", "B", "C"] {
        store.insert_files_batch(volume, &[entry("iso.img", 1000)]).unwrap();
    }
    store.insert_files_batch("A", &[entry("x.bin", 10)]).unwrap();
    store.insert_files_batch("B", &[entry("x.bin", 10)]).unwrap();

    let groups = DuplicateAnalyzer::new(store)
        .get_duplicate_groups(&HashMap::new())
        .unwrap();
    let summary = summarize(&groups);
    assert_eq!(summary.groups, 2);
    assert_eq!(summary.files, 5);
    assert_eq!(summary.wasted_bytes, 2 * 1000 + 10);
}

#[test]
fn test_summary_does_not_double_count_unhashed_copies() {
    let store = setup(&["a", "b", "c"]);
    for volume in ["a", "b", "c"] {
        store.insert_files_batch(volume, &[entry("p.jpg", 100)]).unwrap();
    }
    set_hash(&store, "a", "p.jpg", 1);
    set_hash(&store, "b", "p.jpg", 2);

    let groups = DuplicateAnalyzer::new(store)
        .get_duplicate_groups(&HashMap::new())
        .unwrap();
    let summary = summarize(&groups);
    assert_eq!(summary.groups, 2);
    assert_eq!(summary.files, 3);
    // a and b differ, so only one of the three copies can go.
    assert_eq!(summary.wasted_bytes, 100);
}
