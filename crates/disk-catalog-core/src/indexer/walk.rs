use crate::cancel::CancelToken;
use crate::config::IndexSettings;
use crate::error::Result;
use crate::storage::models::FileEntry;
use glob::Pattern;
use std::collections::HashSet;
use std::fs::Metadata;
use std::io;
use std::path::{Component, Path};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, warn};
use walkdir::{DirEntry, WalkDir};

/// Lossy conversion replaces undecodable bytes with this character.
const REPLACEMENT: char = '\u{FFFD}';

#[derive(Debug, Default, Clone)]
pub struct WalkStats {
    pub entries: usize,
    pub errors: usize,
    /// Relative paths the walk could not read. Records at or below them
    /// were not observed, so they must not be swept. An empty string
    /// stands for the volume root.
    pub unreadable: Vec<String>,
}

impl WalkStats {
    fn mark_unreadable(&mut self, root: &Path, path: Option<&Path>) {
        let rel = path.and_then(|p| relative_path(root, p)).unwrap_or_default();
        self.unreadable.push(rel);
    }
}

/// Sequential traversal of a volume. Calls `visit` once per non-excluded
/// entry (files and directories, never the root itself). Symlinks are not
/// followed or recorded. Excluded directories are pruned, so nothing below
/// them is visited. The cancel token is polled before every entry.
///
/// Names that are not valid UTF-8 are stored lossily. When two such names
/// collapse onto the same relative path, only the first one (in file name
/// order) is recorded and the others count as walk errors.
pub fn walk_volume<F>(
    root: &Path,
    settings: &IndexSettings,
    cancel: &CancelToken,
    mut visit: F,
) -> Result<WalkStats>
where
    F: FnMut(FileEntry) -> Result<()>,
{
    let ignore_patterns = settings.compiled_ignore_patterns();
    let mut stats = WalkStats::default();
    let mut lossy_paths: HashSet<String> = HashSet::new();

    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(root, entry, settings, &ignore_patterns));

    while let Some(entry_result) = walker.next() {
        cancel.check()?;

        let entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                stats.errors += 1;
                stats.mark_unreadable(root, err.path());
                match err.io_error().map(io::Error::kind) {
                    Some(io::ErrorKind::PermissionDenied) => {
                        error!("Access denied while walking {}: {}", root.display(), err)
                    }
                    _ => warn!("Skipping unreadable entry under {}: {}", root.display(), err),
                }
                continue;
            }
        };

        if entry.path_is_symlink() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                stats.errors += 1;
                stats.mark_unreadable(root, Some(entry.path()));
                warn!(
                    "Error getting metadata for {}: {}",
                    entry.path().display(),
                    err
                );
                continue;
            }
        };

        let Some(relative_path) = relative_path(root, entry.path()) else {
            continue;
        };

        if relative_path.contains(REPLACEMENT) && !lossy_paths.insert(relative_path.clone()) {
            stats.errors += 1;
            warn!(
                "Skipping {}: its name is not valid UTF-8 and collides with {}",
                entry.path().display(),
                relative_path
            );
            if metadata.is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }

        visit(build_entry(relative_path, &metadata))?;
        stats.entries += 1;
    }

    Ok(stats)
}

fn is_excluded(
    root: &Path,
    entry: &DirEntry,
    settings: &IndexSettings,
    ignore_patterns: &[Pattern],
) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        if settings.is_excluded_dir(&name) {
            return true;
        }
    } else if let Some(ext) = entry.path().extension() {
        if settings.is_excluded_extension(&ext.to_string_lossy()) {
            return true;
        }
    }

    if ignore_patterns.is_empty() {
        return false;
    }
    match relative_path(root, entry.path()) {
        Some(rel) => ignore_patterns.iter().any(|p| p.matches(&rel)),
        None => false,
    }
}

/// Path below the volume root with `/` separators.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn build_entry(relative_path: String, metadata: &Metadata) -> FileEntry {
    let (parent_path, name) = match relative_path.rsplit_once('/') {
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => (String::new(), relative_path.clone()),
    };
    let is_directory = metadata.is_dir();
    let extension = if is_directory {
        None
    } else {
        Path::new(&name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    };

    FileEntry {
        relative_path,
        parent_path,
        name,
        extension,
        size: if is_directory { 0 } else { metadata.len() as i64 },
        created_at: metadata.created().ok().and_then(unix_millis),
        modified_at: metadata.modified().ok().and_then(unix_millis).unwrap_or(0),
        is_directory,
    }
}

fn unix_millis(time: SystemTime) -> Option<i64> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn collect(root: &Path, settings: &IndexSettings) -> Vec<FileEntry> {
        let mut entries = Vec::new();
        walk_volume(root, settings, &CancelToken::new(), |e| {
            entries.push(e);
            Ok(())
        })
        .unwrap();
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        entries
    }

    #[test]
    fn test_relative_path_uses_forward_slashes() {
        let root = Path::new("/mnt/disk");
        assert_eq!(
            relative_path(root, Path::new("/mnt/disk/a/b.txt")).as_deref(),
            Some("a/b.txt")
        );
        assert_eq!(relative_path(root, root), None);
    }

    #[test]
    fn test_walk_records_files_and_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs/2024")).unwrap();
        fs::write(dir.path().join("docs/2024/Invoice.PDF"), b"12345").unwrap();
        fs::write(dir.path().join("readme.txt"), b"hi").unwrap();

        let entries = collect(dir.path(), &IndexSettings::default());
        let paths: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["docs", "docs/2024", "docs/2024/Invoice.PDF", "readme.txt"]
        );

        let invoice = &entries[2];
        assert_eq!(invoice.parent_path, "docs/2024");
        assert_eq!(invoice.name, "Invoice.PDF");
        assert_eq!(invoice.extension.as_deref(), Some("pdf"));
        assert_eq!(invoice.size, 5);
        assert!(!invoice.is_directory);
        assert!(entries[0].is_directory);
        assert_eq!(entries[0].parent_path, "");
    }

    #[test]
    fn test_excluded_dirs_and_extensions_are_pruned() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".Trashes/inner")).unwrap();
        fs::write(dir.path().join(".Trashes/inner/old.txt"), b"x").unwrap();
        fs::write(dir.path().join("keep.txt"), b"x").unwrap();
        fs::write(dir.path().join("skip.tmp"), b"x").unwrap();
        fs::write(dir.path().join("notes.bak"), b"x").unwrap();

        let settings = IndexSettings {
            excluded_extensions: vec!["tmp".to_string()],
            ignore_patterns: vec!["*.bak".to_string()],
            ..IndexSettings::default()
        };
        let entries = collect(dir.path(), &settings);
        let paths: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["keep.txt"]);
    }

    #[test]
    fn test_cancelled_walk_stops() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = walk_volume(dir.path(), &IndexSettings::default(), &cancel, |_| Ok(()));
        assert!(matches!(result, Err(crate::Error::Cancelled)));
    }
}
