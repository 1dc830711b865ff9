use super::models::*;
use super::sqlite::Store;
use crate::config::{IndexSettings, INDEX_SETTINGS_KEY};
use crate::error::{Error, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Rows written per transaction by the indexer.
pub const BATCH_SIZE: usize = 1000;

const FILE_COLUMNS: &str = "id, volume_id, relative_path, parent_path, name, extension, size, \
     created_at, modified_at, is_directory, content_hash, duplicate_key";

const VOLUME_COLUMNS: &str = "id, name, total_capacity, available_capacity, last_seen_at, \
     last_scan_at, file_count, is_excluded";

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        volume_id: row.get(1)?,
        relative_path: row.get(2)?,
        parent_path: row.get(3)?,
        name: row.get(4)?,
        extension: row.get(5)?,
        size: row.get(6)?,
        created_at: row.get(7)?,
        modified_at: row.get(8)?,
        is_directory: row.get(9)?,
        content_hash: row.get(10)?,
        duplicate_key: row.get(11)?,
    })
}

fn volume_from_row(row: &Row<'_>) -> rusqlite::Result<Volume> {
    Ok(Volume {
        id: row.get(0)?,
        name: row.get(1)?,
        total_capacity: row.get(2)?,
        available_capacity: row.get(3)?,
        last_seen_at: row.get(4)?,
        last_scan_at: row.get(5)?,
        file_count: row.get(6)?,
        is_excluded: row.get(7)?,
    })
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Store {
    // ── Volumes ──────────────────────────────────────────────────

    /// Create the volume on first sight, otherwise refresh its name and capacity.
    pub fn upsert_volume(&self, info: &VolumeInfo) -> Result<()> {
        let seen = now();
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO volumes (id, name, total_capacity, available_capacity, last_seen_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(id) DO UPDATE SET \
                     name = excluded.name, \
                     total_capacity = excluded.total_capacity, \
                     available_capacity = excluded.available_capacity, \
                     last_seen_at = excluded.last_seen_at",
                params![
                    info.id,
                    info.name,
                    info.total_capacity,
                    info.available_capacity,
                    seen
                ],
            )?;
            Ok(())
        })
    }

    pub fn touch_volume(&self, volume_id: &str) -> Result<()> {
        let seen = now();
        self.with_writer(|conn| {
            conn.execute(
                "UPDATE volumes SET last_seen_at = ?1 WHERE id = ?2",
                params![seen, volume_id],
            )?;
            Ok(())
        })
    }

    pub fn get_volume(&self, volume_id: &str) -> Result<Option<Volume>> {
        let sql = format!("SELECT {} FROM volumes WHERE id = ?1", VOLUME_COLUMNS);
        self.with_reader(|conn| {
            Ok(conn
                .query_row(&sql, params![volume_id], volume_from_row)
                .optional()?)
        })
    }

    pub fn list_volumes(&self) -> Result<Vec<Volume>> {
        let sql = format!("SELECT {} FROM volumes ORDER BY name, id", VOLUME_COLUMNS);
        self.query(&sql, [], volume_from_row)
    }

    pub fn set_volume_excluded(&self, volume_id: &str, excluded: bool) -> Result<()> {
        let changed = self.with_writer(|conn| {
            Ok(conn.execute(
                "UPDATE volumes SET is_excluded = ?1 WHERE id = ?2",
                params![excluded, volume_id],
            )?)
        })?;
        if changed == 0 {
            return Err(Error::NotFound(format!("volume {}", volume_id)));
        }
        Ok(())
    }

    /// Stamp a finished scan. A set `last_scan_at` switches later scans to delta mode.
    pub fn record_scan_completed(&self, volume_id: &str, file_count: i64) -> Result<()> {
        let finished = now();
        self.with_writer(|conn| {
            conn.execute(
                "UPDATE volumes SET last_scan_at = ?1, file_count = ?2 WHERE id = ?3",
                params![finished, file_count, volume_id],
            )?;
            Ok(())
        })
    }

    /// Remove a volume and every record on it in one transaction.
    pub fn delete_volume(&self, volume_id: &str) -> Result<usize> {
        let (files, volumes) = self.with_writer(|conn| {
            let tx = conn.transaction()?;
            let files = tx.execute("DELETE FROM files WHERE volume_id = ?1", params![volume_id])?;
            let volumes = tx.execute("DELETE FROM volumes WHERE id = ?1", params![volume_id])?;
            tx.commit()?;
            Ok((files, volumes))
        })?;
        if volumes == 0 {
            return Err(Error::NotFound(format!("volume {}", volume_id)));
        }
        debug!("Deleted volume {} and {} file records", volume_id, files);
        Ok(files)
    }

    // ── File Records ─────────────────────────────────────────────

    pub fn insert_files_batch(&self, volume_id: &str, entries: &[FileEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let count = self.with_writer(|conn| {
            let tx = conn.transaction()?;
            let mut count = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO files \
                     (volume_id, relative_path, parent_path, name, extension, size, \
                      created_at, modified_at, is_directory) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for entry in entries {
                    count += stmt.execute(params![
                        volume_id,
                        entry.relative_path,
                        entry.parent_path,
                        entry.name,
                        entry.extension,
                        entry.size,
                        entry.created_at,
                        entry.modified_at,
                        entry.is_directory,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(count)
        })?;
        debug!("Inserted {} file records for volume {}", count, volume_id);
        Ok(count)
    }

    /// Overwrite changed records. The stored content hash is cleared so the
    /// hashing phase picks the file up again.
    pub fn update_files_batch(&self, updates: &[FileUpdate]) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        let count = self.with_writer(|conn| {
            let tx = conn.transaction()?;
            let mut count = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "UPDATE files SET relative_path = ?1, parent_path = ?2, name = ?3, \
                     extension = ?4, size = ?5, created_at = ?6, modified_at = ?7, \
                     is_directory = ?8, content_hash = NULL, duplicate_key = NULL \
                     WHERE id = ?9",
                )?;
                for update in updates {
                    let entry = &update.entry;
                    count += stmt.execute(params![
                        entry.relative_path,
                        entry.parent_path,
                        entry.name,
                        entry.extension,
                        entry.size,
                        entry.created_at,
                        entry.modified_at,
                        entry.is_directory,
                        update.id,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(count)
        })?;
        debug!("Updated {} file records", count);
        Ok(count)
    }

    pub fn delete_files_batch(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let count = self.with_writer(|conn| {
            let tx = conn.transaction()?;
            let mut count = 0;
            {
                let mut stmt = tx.prepare_cached("DELETE FROM files WHERE id = ?1")?;
                for id in ids {
                    count += stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
            Ok(count)
        })?;
        debug!("Deleted {} file records", count);
        Ok(count)
    }

    pub fn clear_volume_files(&self, volume_id: &str) -> Result<usize> {
        let count = self.with_writer(|conn| {
            let tx = conn.transaction()?;
            let count = tx.execute("DELETE FROM files WHERE volume_id = ?1", params![volume_id])?;
            tx.commit()?;
            Ok(count)
        })?;
        debug!("Cleared {} file records for volume {}", count, volume_id);
        Ok(count)
    }

    pub fn get_existing_files(&self, volume_id: &str) -> Result<Vec<ExistingFile>> {
        self.query(
            "SELECT id, relative_path, modified_at FROM files WHERE volume_id = ?1",
            params![volume_id],
            |row| {
                Ok(ExistingFile {
                    id: row.get(0)?,
                    relative_path: row.get(1)?,
                    modified_at: row.get(2)?,
                })
            },
        )
    }

    pub fn get_file(&self, volume_id: &str, relative_path: &str) -> Result<Option<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM files WHERE volume_id = ?1 AND relative_path = ?2",
            FILE_COLUMNS
        );
        self.with_reader(|conn| {
            Ok(conn
                .query_row(&sql, params![volume_id, relative_path], file_from_row)
                .optional()?)
        })
    }

    pub fn list_files(&self, volume_id: &str) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM files WHERE volume_id = ?1 ORDER BY relative_path",
            FILE_COLUMNS
        );
        self.query(&sql, params![volume_id], file_from_row)
    }

    /// Direct children of `parent_path` ("" for the volume root), directories first.
    pub fn get_children(&self, volume_id: &str, parent_path: &str) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM files WHERE volume_id = ?1 AND parent_path = ?2 \
             ORDER BY is_directory DESC, name COLLATE NOCASE",
            FILE_COLUMNS
        );
        self.query(&sql, params![volume_id, parent_path], file_from_row)
    }

    pub fn count_files(&self, volume_id: Option<&str>) -> Result<i64> {
        match volume_id {
            Some(id) => self.query_row(
                "SELECT COUNT(*) FROM files WHERE volume_id = ?1",
                params![id],
                |row| row.get(0),
            ),
            None => self.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0)),
        }
    }

    // ── Text Index ───────────────────────────────────────────────

    pub fn count_text_entries(&self) -> Result<i64> {
        self.query_row("SELECT COUNT(*) FROM file_search", [], |row| row.get(0))
    }

    /// Records without a text entry plus text entries without a record. Always 0
    /// unless the database was modified behind the triggers' back.
    pub fn text_index_divergence(&self) -> Result<i64> {
        self.query_row(
            "SELECT \
               (SELECT COUNT(*) FROM files f \
                 WHERE NOT EXISTS (SELECT 1 FROM file_search s WHERE s.rowid = f.id)) + \
               (SELECT COUNT(*) FROM file_search s \
                 WHERE NOT EXISTS (SELECT 1 FROM files f WHERE f.id = s.rowid))",
            [],
            |row| row.get(0),
        )
    }

    /// Ranked full-text search over names and paths. Blank input matches nothing.
    pub fn search(&self, text: &str, limit: i64, offset: i64) -> Result<Vec<SearchHit>> {
        let Some(expr) = build_match_expression(text) else {
            return Ok(Vec::new());
        };
        self.query(
            "SELECT f.id, f.name, f.relative_path, f.size, f.volume_id, v.name, \
                    f.is_directory, bm25(file_search, 10.0, 1.0) AS score \
             FROM file_search \
             JOIN files f ON f.id = file_search.rowid \
             JOIN volumes v ON v.id = f.volume_id \
             WHERE file_search MATCH ?1 \
             ORDER BY score, f.name \
             LIMIT ?2 OFFSET ?3",
            params![expr, limit, offset],
            |row| {
                Ok(SearchHit {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    relative_path: row.get(2)?,
                    size: row.get(3)?,
                    volume_id: row.get(4)?,
                    volume_name: row.get(5)?,
                    is_directory: row.get(6)?,
                    score: row.get(7)?,
                })
            },
        )
    }

    // ── Duplicates ───────────────────────────────────────────────

    /// Regular files grouped by `(name, size)`, keeping groups on two or more volumes.
    pub fn get_duplicate_groups(&self) -> Result<Vec<DuplicateCandidate>> {
        let rows = self.query(
            "SELECT f.name, f.size, f.id, f.volume_id, v.name, f.relative_path, f.content_hash \
             FROM files f \
             JOIN volumes v ON v.id = f.volume_id \
             JOIN (SELECT name, size FROM files WHERE is_directory = 0 \
                   GROUP BY name, size HAVING COUNT(DISTINCT volume_id) >= 2) g \
               ON g.name = f.name AND g.size = f.size \
             WHERE f.is_directory = 0 \
             ORDER BY f.size DESC, f.name, f.volume_id, f.relative_path",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    DuplicateMember {
                        file_id: row.get(2)?,
                        volume_id: row.get(3)?,
                        volume_name: row.get(4)?,
                        relative_path: row.get(5)?,
                        content_hash: row.get(6)?,
                    },
                ))
            },
        )?;

        let mut groups: Vec<DuplicateCandidate> = Vec::new();
        for (name, size, member) in rows {
            match groups.last_mut() {
                Some(group) if group.name == name && group.size == size => {
                    group.members.push(member)
                }
                _ => groups.push(DuplicateCandidate {
                    name,
                    size,
                    members: vec![member],
                }),
            }
        }
        Ok(groups)
    }

    // ── Content Hashes ───────────────────────────────────────────

    /// Next page of unhashed regular files at or above `min_size`, keyed by id.
    pub fn files_needing_hash(
        &self,
        volume_id: &str,
        min_size: i64,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<HashCandidate>> {
        self.query(
            "SELECT id, relative_path, size FROM files \
             WHERE volume_id = ?1 AND is_directory = 0 AND content_hash IS NULL \
               AND size >= ?2 AND id > ?3 \
             ORDER BY id LIMIT ?4",
            params![volume_id, min_size, after_id, limit],
            |row| {
                Ok(HashCandidate {
                    id: row.get(0)?,
                    relative_path: row.get(1)?,
                    size: row.get(2)?,
                })
            },
        )
    }

    pub fn update_hashes_batch(&self, updates: &[HashUpdate]) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        self.with_writer(|conn| {
            let tx = conn.transaction()?;
            let mut count = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "UPDATE files SET content_hash = ?1, duplicate_key = ?2 WHERE id = ?3",
                )?;
                for update in updates {
                    count += stmt.execute(params![
                        update.content_hash,
                        update.duplicate_key,
                        update.id
                    ])?;
                }
            }
            tx.commit()?;
            Ok(count)
        })
    }

    // ── Settings ─────────────────────────────────────────────────

    pub fn get_setting<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self.with_reader(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        match raw {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    pub fn set_setting<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_string(value)?;
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    /// Persisted index settings, or `defaults` when none were saved yet.
    pub fn load_index_settings(&self, defaults: &IndexSettings) -> Result<IndexSettings> {
        Ok(self
            .get_setting::<IndexSettings>(INDEX_SETTINGS_KEY)?
            .unwrap_or_else(|| defaults.clone()))
    }

    pub fn save_index_settings(&self, settings: &IndexSettings) -> Result<()> {
        self.set_setting(INDEX_SETTINGS_KEY, settings)
    }
}

/// Turn free text into an FTS5 expression: every term becomes a quoted
/// prefix query, terms are ANDed. `None` when nothing searchable remains.
pub(crate) fn build_match_expression(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .filter(|term| term.chars().any(char::is_alphanumeric))
        .map(|term| format!("\"{}\"*", term.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_query_has_no_expression() {
        assert_eq!(build_match_expression(""), None);
        assert_eq!(build_match_expression("   \t"), None);
        assert_eq!(build_match_expression("* - ."), None);
    }

    #[test]
    fn test_terms_are_quoted_prefixes() {
        assert_eq!(
            build_match_expression("invoice 2024").as_deref(),
            Some("\"invoice\"* \"2024\"*")
        );
        assert_eq!(
            build_match_expression("say\"hi").as_deref(),
            Some("\"say\"\"hi\"*")
        );
    }
}
