use crate::error::Result;
use crate::storage::models::{DuplicateCandidate, DuplicateMember};
use crate::storage::Store;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// How the caller uses a volume. Held by the caller, never persisted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VolumeRole {
    Source,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SafetyClass {
    /// At least one copy lives on a source and one on a backup.
    HasBackup,
    /// Copies sit on several sources and no backup.
    RedundantSources,
    /// Every designated copy is on a backup.
    BackupOnly,
    Unclassified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchKind {
    /// Same name and size; content not confirmed.
    NameSize,
    /// Every member carries the same content hash.
    ContentHash,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub name: String,
    pub size: i64,
    pub match_kind: MatchKind,
    pub content_hash: Option<i64>,
    pub members: Vec<DuplicateMember>,
    pub volume_ids: Vec<String>,
    pub safety: SafetyClass,
}

impl DuplicateGroup {
    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn wasted_bytes(&self) -> i64 {
        self.size * (self.members.len() as i64 - 1).max(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateSummary {
    pub groups: usize,
    pub files: usize,
    pub wasted_bytes: i64,
}

/// Read-only projection of cross-volume duplicates.
pub struct DuplicateAnalyzer {
    store: Arc<Store>,
}

impl DuplicateAnalyzer {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Groups spanning two or more volumes, largest files first.
    pub fn get_duplicate_groups(
        &self,
        roles: &HashMap<String, VolumeRole>,
    ) -> Result<Vec<DuplicateGroup>> {
        let candidates = self.store.get_duplicate_groups()?;
        let candidate_count = candidates.len();
        let groups: Vec<DuplicateGroup> = candidates
            .into_iter()
            .flat_map(refine_by_hash)
            .map(|mut group| {
                group.safety = classify(&group.volume_ids, roles);
                group
            })
            .collect();
        debug!(
            "{} name/size candidates refined into {} duplicate groups",
            candidate_count,
            groups.len()
        );
        Ok(groups)
    }
}

/// Split a `(name, size)` candidate by content hash.
///
/// Hashed members partition by hash. Members without a hash cannot be told
/// apart, so they join every partition. Partitions left on a single volume
/// are dropped.
pub fn refine_by_hash(candidate: DuplicateCandidate) -> Vec<DuplicateGroup> {
    let DuplicateCandidate {
        name,
        size,
        members,
    } = candidate;

    let mut by_hash: BTreeMap<i64, Vec<DuplicateMember>> = BTreeMap::new();
    let mut unhashed = Vec::new();
    for member in members {
        match member.content_hash {
            Some(hash) => by_hash.entry(hash).or_default().push(member),
            None => unhashed.push(member),
        }
    }

    let partitions: Vec<(Option<i64>, Vec<DuplicateMember>)> = if by_hash.is_empty() {
        vec![(None, unhashed)]
    } else {
        by_hash
            .into_iter()
            .map(|(hash, mut members)| {
                members.extend(unhashed.iter().cloned());
                (Some(hash), members)
            })
            .collect()
    };

    partitions
        .into_iter()
        .filter_map(|(hash, mut members)| {
            members.sort_by(|a, b| {
                (&a.volume_id, &a.relative_path).cmp(&(&b.volume_id, &b.relative_path))
            });
            let volume_ids: Vec<String> = members
                .iter()
                .map(|m| m.volume_id.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if volume_ids.len() < 2 {
                return None;
            }
            let match_kind = if members.iter().all(|m| m.content_hash.is_some()) {
                MatchKind::ContentHash
            } else {
                MatchKind::NameSize
            };
            Some(DuplicateGroup {
                name: name.clone(),
                size,
                match_kind,
                content_hash: hash,
                members,
                volume_ids,
                safety: SafetyClass::Unclassified,
            })
        })
        .collect()
}

pub fn classify(volume_ids: &[String], roles: &HashMap<String, VolumeRole>) -> SafetyClass {
    let mut sources = 0;
    let mut backups = 0;
    for id in volume_ids {
        match roles.get(id) {
            Some(VolumeRole::Source) => sources += 1,
            Some(VolumeRole::Backup) => backups += 1,
            None => {}
        }
    }
    match (sources, backups) {
        (s, b) if s >= 1 && b >= 1 => SafetyClass::HasBackup,
        (s, _) if s >= 2 => SafetyClass::RedundantSources,
        (0, b) if b >= 1 => SafetyClass::BackupOnly,
        _ => SafetyClass::Unclassified,
    }
}

/// Totals over distinct files.
///
/// An unhashed file can sit in several groups of the same `(name, size)`
/// candidate, so members are counted once by `file_id`. Every distinct
/// content hash in a candidate needs one surviving copy; the rest is
/// reclaimable.
pub fn summarize(groups: &[DuplicateGroup]) -> DuplicateSummary {
    let mut candidates: HashMap<(&str, i64), (BTreeSet<i64>, BTreeSet<i64>)> = HashMap::new();
    for group in groups {
        let (files, hashes) = candidates
            .entry((group.name.as_str(), group.size))
            .or_default();
        for member in &group.members {
            files.insert(member.file_id);
            if let Some(hash) = member.content_hash {
                hashes.insert(hash);
            }
        }
    }

    DuplicateSummary {
        groups: groups.len(),
        files: candidates.values().map(|(files, _)| files.len()).sum(),
        wasted_bytes: candidates
            .iter()
            .map(|((_, size), (files, hashes))| {
                let keep = hashes.len().max(1);
                size * files.len().saturating_sub(keep) as i64
            })
            .sum(),
    }
}
