use serde::Serialize;

/// A storage volume tracked by its stable identity, independent of mount path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub total_capacity: i64,
    pub available_capacity: i64,
    pub last_seen_at: Option<String>,
    pub last_scan_at: Option<String>,
    pub file_count: i64,
    pub is_excluded: bool,
}

/// Attributes of a volume reported by the platform on attach.
#[derive(Debug, Clone)]
pub struct VolumeInfo {
    pub id: String,
    pub name: String,
    pub total_capacity: i64,
    pub available_capacity: i64,
}

/// A persisted file or directory belonging to one volume.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub id: i64,
    pub volume_id: String,
    pub relative_path: String,
    pub parent_path: String,
    pub name: String,
    pub extension: Option<String>,
    pub size: i64,
    pub created_at: Option<i64>,
    pub modified_at: i64,
    pub is_directory: bool,
    pub content_hash: Option<i64>,
    pub duplicate_key: Option<String>,
}

/// Metadata for one entry found while walking a volume. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub relative_path: String,
    pub parent_path: String,
    pub name: String,
    pub extension: Option<String>,
    pub size: i64,
    pub created_at: Option<i64>,
    pub modified_at: i64,
    pub is_directory: bool,
}

/// A changed entry to write over an existing record.
#[derive(Debug, Clone)]
pub struct FileUpdate {
    pub id: i64,
    pub entry: FileEntry,
}

/// Lightweight projection loaded for delta diffing.
#[derive(Debug, Clone)]
pub struct ExistingFile {
    pub id: i64,
    pub relative_path: String,
    pub modified_at: i64,
}

/// A computed content hash ready to be written back.
#[derive(Debug, Clone)]
pub struct HashUpdate {
    pub id: i64,
    pub content_hash: i64,
    pub duplicate_key: String,
}

/// A record waiting for its content hash.
#[derive(Debug, Clone)]
pub struct HashCandidate {
    pub id: i64,
    pub relative_path: String,
    pub size: i64,
}

/// One ranked full-text match.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub name: String,
    pub relative_path: String,
    pub size: i64,
    pub volume_id: String,
    pub volume_name: String,
    pub is_directory: bool,
    pub score: f64,
}

/// Files sharing `(name, size)` on at least two volumes.
#[derive(Debug, Clone)]
pub struct DuplicateCandidate {
    pub name: String,
    pub size: i64,
    pub members: Vec<DuplicateMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMember {
    pub file_id: i64,
    pub volume_id: String,
    pub volume_name: String,
    pub relative_path: String,
    pub content_hash: Option<i64>,
}
