use crate::storage::models::{ExistingFile, FileEntry};
use std::collections::HashMap;

/// Verdict for one walked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    Modified { id: i64 },
    Unchanged,
}

/// Mark-and-sweep state for a delta scan.
///
/// Holds the persisted `(path → id, modified_at)` lookup. Classifying an
/// entry marks it visited by removing it from the lookup; whatever is left
/// after the walk was deleted from the volume.
pub struct Reconciler {
    existing: HashMap<String, (i64, i64)>,
    tolerance_ms: i64,
}

impl Reconciler {
    pub fn new(existing: Vec<ExistingFile>, tolerance_ms: i64) -> Self {
        let existing = existing
            .into_iter()
            .map(|f| (f.relative_path, (f.id, f.modified_at)))
            .collect();
        Self {
            existing,
            tolerance_ms: tolerance_ms.max(0),
        }
    }

    pub fn classify(&mut self, entry: &FileEntry) -> Change {
        match self.existing.remove(&entry.relative_path) {
            None => Change::New,
            Some((id, modified_at)) => {
                if (entry.modified_at - modified_at).abs() > self.tolerance_ms {
                    Change::Modified { id }
                } else {
                    Change::Unchanged
                }
            }
        }
    }

    /// Entries still unvisited.
    pub fn remaining(&self) -> usize {
        self.existing.len()
    }

    /// Ids of every record the walk never reached, in ascending order.
    ///
    /// Records at or below an `unreadable` path are kept: the walk could not
    /// tell whether they still exist. An empty path covers the whole volume.
    pub fn into_deleted(self, unreadable: &[String]) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .existing
            .into_iter()
            .filter(|(path, _)| !unreadable.iter().any(|dir| is_within(path, dir)))
            .map(|(_, (id, _))| id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

fn is_within(path: &str, dir: &str) -> bool {
    dir.is_empty()
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn existing(id: i64, path: &str, modified_at: i64) -> ExistingFile {
        ExistingFile {
            id,
            relative_path: path.to_string(),
            modified_at,
        }
    }

    fn walked(path: &str, modified_at: i64) -> FileEntry {
        FileEntry {
            relative_path: path.to_string(),
            parent_path: String::new(),
            name: path.to_string(),
            extension: None,
            size: 1,
            created_at: None,
            modified_at,
            is_directory: false,
        }
    }

    #[test]
    fn test_tolerance_absorbs_coarse_timestamps() {
        let mut r = Reconciler::new(
            vec![existing(1, "a", 10_000), existing(2, "b", 10_000)],
            1000,
        );
        assert_eq!(r.classify(&walked("a", 10_999)), Change::Unchanged);
        assert_eq!(r.classify(&walked("b", 11_001)), Change::Modified { id: 2 });
        assert!(r.into_deleted(&[]).is_empty());
    }

    #[test]
    fn test_older_timestamp_also_counts_as_modified() {
        let mut r = Reconciler::new(vec![existing(7, "a", 50_000)], 1000);
        assert_eq!(r.classify(&walked("a", 40_000)), Change::Modified { id: 7 });
    }

    #[test]
    fn test_mark_and_sweep_set_identities() {
        // E = {a, b, c, d}, W = {b, c, d, e, f}; c is modified.
        let e = vec![
            existing(1, "a", 0),
            existing(2, "b", 0),
            existing(3, "c", 0),
            existing(4, "d", 0),
        ];
        let w = vec![
            walked("b", 0),
            walked("c", 5_000),
            walked("d", 0),
            walked("e", 0),
            walked("f", 0),
        ];
        let e_paths: HashSet<&str> = e.iter().map(|f| f.relative_path.as_str()).collect();
        let e_len = e.len();

        let mut r = Reconciler::new(e.clone(), 1000);
        let mut inserted = HashSet::new();
        let mut updated = HashSet::new();
        let mut unchanged = 0;
        for entry in &w {
            match r.classify(entry) {
                Change::New => {
                    inserted.insert(entry.relative_path.clone());
                }
                Change::Modified { id } => {
                    updated.insert(id);
                }
                Change::Unchanged => unchanged += 1,
            }
        }
        let deleted = r.into_deleted(&[]);

        let w_paths: HashSet<&str> = w.iter().map(|f| f.relative_path.as_str()).collect();
        let expected_inserted: HashSet<String> = w_paths
            .difference(&e_paths)
            .map(|s| s.to_string())
            .collect();
        assert_eq!(inserted, expected_inserted);
        assert_eq!(deleted, vec![1]);
        assert_eq!(updated, HashSet::from([3]));
        assert_eq!(inserted.len() + unchanged + updated.len(), w.len());
        assert_eq!(deleted.len() + unchanged + updated.len(), e_len);
    }

    #[test]
    fn test_unreadable_subtrees_are_not_swept() {
        let r = Reconciler::new(
            vec![
                existing(1, "photos", 0),
                existing(2, "photos/a.jpg", 0),
                existing(3, "photos/2024/b.jpg", 0),
                existing(4, "photos-old/c.jpg", 0),
                existing(5, "gone.txt", 0),
            ],
            1000,
        );
        assert_eq!(r.into_deleted(&["photos".to_string()]), vec![4, 5]);

        let r = Reconciler::new(vec![existing(1, "a", 0), existing(2, "b/c", 0)], 1000);
        assert!(r.into_deleted(&[String::new()]).is_empty());
    }
}
