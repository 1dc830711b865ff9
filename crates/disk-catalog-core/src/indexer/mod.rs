pub mod hash;
pub mod reconcile;
pub mod walk;

use crate::cancel::CancelToken;
use crate::config::IndexSettings;
use crate::error::{Error, Result};
use crate::progress::{ProgressReporter, ProgressThrottle, DEFAULT_PROGRESS_INTERVAL};
use crate::storage::models::{FileEntry, FileUpdate, HashCandidate, HashUpdate};
use crate::storage::{Store, BATCH_SIZE};
use rayon::prelude::*;
use reconcile::{Change, Reconciler};
use serde::Serialize;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Files hashed in parallel before each write-back.
const HASH_BATCH_SIZE: i64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanMode {
    /// Clear and reinsert everything.
    Full,
    /// Mark-and-sweep against the persisted state.
    Delta,
}

/// Lifecycle of one indexing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Pending,
    Walking,
    Diffing,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub mode: ScanMode,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Entries seen by the walk.
    pub total_files: usize,
    pub walk_errors: usize,
    pub duration: Duration,
}

impl ScanSummary {
    fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            deleted: 0,
            total_files: 0,
            walk_errors: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.inserted + self.updated + self.deleted > 0
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HashSummary {
    pub hashed: usize,
    pub skipped: usize,
    pub duration: Duration,
}

/// Buffers inserts and updates and commits them in bounded batches,
/// always inserts before updates.
struct PendingWrites<'a> {
    store: &'a Store,
    volume_id: &'a str,
    inserts: Vec<FileEntry>,
    updates: Vec<FileUpdate>,
    inserted: usize,
    updated: usize,
}

impl<'a> PendingWrites<'a> {
    fn new(store: &'a Store, volume_id: &'a str) -> Self {
        Self {
            store,
            volume_id,
            inserts: Vec::new(),
            updates: Vec::new(),
            inserted: 0,
            updated: 0,
        }
    }

    fn insert(&mut self, entry: FileEntry, cancel: &CancelToken) -> Result<()> {
        self.inserts.push(entry);
        if self.inserts.len() >= BATCH_SIZE {
            self.flush(cancel)?;
        }
        Ok(())
    }

    fn update(&mut self, update: FileUpdate, cancel: &CancelToken) -> Result<()> {
        self.updates.push(update);
        if self.updates.len() >= BATCH_SIZE {
            self.flush(cancel)?;
        }
        Ok(())
    }

    fn flush(&mut self, cancel: &CancelToken) -> Result<()> {
        if !self.inserts.is_empty() {
            cancel.check()?;
            self.inserted += self.store.insert_files_batch(self.volume_id, &self.inserts)?;
            self.inserts.clear();
        }
        if !self.updates.is_empty() {
            cancel.check()?;
            self.updated += self.store.update_files_batch(&self.updates)?;
            self.updates.clear();
        }
        Ok(())
    }
}

/// Reconciles a volume's filesystem tree into the store. Sole writer of file records.
pub struct Indexer {
    store: Arc<Store>,
    progress_interval: Duration,
}

impl Indexer {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Minimum time between `on_index_progress` events during a walk.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Index a volume: FULL when it was never scanned, DELTA otherwise.
    pub fn index_volume(
        &self,
        volume_id: &str,
        root: &Path,
        settings: &IndexSettings,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanSummary> {
        self.run(volume_id, root, None, settings, cancel, reporter)
    }

    /// Index a volume with an explicit mode, e.g. to force a rebuild.
    pub fn index_volume_with_mode(
        &self,
        volume_id: &str,
        root: &Path,
        mode: ScanMode,
        settings: &IndexSettings,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanSummary> {
        self.run(volume_id, root, Some(mode), settings, cancel, reporter)
    }

    fn run(
        &self,
        volume_id: &str,
        root: &Path,
        mode: Option<ScanMode>,
        settings: &IndexSettings,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanSummary> {
        let volume = self
            .store
            .get_volume(volume_id)?
            .ok_or_else(|| Error::NotFound(format!("volume {}", volume_id)))?;
        ensure_root(root)?;

        let mode = mode.unwrap_or(if volume.last_scan_at.is_some() {
            ScanMode::Delta
        } else {
            ScanMode::Full
        });
        info!(
            "Indexing volume {} ({}) at {} in {:?} mode",
            volume.name,
            volume_id,
            root.display(),
            mode
        );
        reporter.on_index_start(volume_id, mode);

        let start = Instant::now();
        let mut summary = match mode {
            ScanMode::Full => self.full_scan(volume_id, root, settings, cancel, reporter)?,
            ScanMode::Delta => self.delta_scan(volume_id, root, settings, cancel, reporter)?,
        };
        summary.duration = start.elapsed();

        let file_count = self.store.count_files(Some(volume_id))?;
        self.store.record_scan_completed(volume_id, file_count)?;

        info!(
            "Indexed volume {} in {:.2}s: {} new, {} modified, {} unchanged, {} deleted",
            volume_id,
            summary.duration.as_secs_f64(),
            summary.inserted,
            summary.updated,
            summary.unchanged,
            summary.deleted
        );
        reporter.on_state_change(volume_id, JobState::Completed);
        reporter.on_index_complete(volume_id, &summary);
        Ok(summary)
    }

    fn full_scan(
        &self,
        volume_id: &str,
        root: &Path,
        settings: &IndexSettings,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanSummary> {
        let mut summary = ScanSummary::new(ScanMode::Full);
        cancel.check()?;
        let cleared = self.store.clear_volume_files(volume_id)?;
        debug!("Full scan of {} cleared {} previous records", volume_id, cleared);

        reporter.on_state_change(volume_id, JobState::Walking);
        let mut pending = PendingWrites::new(&self.store, volume_id);
        let mut throttle = ProgressThrottle::new(self.progress_interval);
        let mut processed = 0usize;

        let stats = walk::walk_volume(root, settings, cancel, |entry| {
            processed += 1;
            if throttle.ready() {
                reporter.on_index_progress(volume_id, processed, &entry.relative_path);
            }
            pending.insert(entry, cancel)
        })?;
        ensure_root(root)?;

        reporter.on_state_change(volume_id, JobState::Writing);
        pending.flush(cancel)?;
        reporter.on_index_progress(volume_id, processed, "");

        summary.inserted = pending.inserted;
        summary.total_files = stats.entries;
        summary.walk_errors = stats.errors;
        Ok(summary)
    }

    fn delta_scan(
        &self,
        volume_id: &str,
        root: &Path,
        settings: &IndexSettings,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanSummary> {
        let mut summary = ScanSummary::new(ScanMode::Delta);
        let existing = self.store.get_existing_files(volume_id)?;
        debug!(
            "Delta scan of {} loaded {} existing records",
            volume_id,
            existing.len()
        );
        let mut reconciler = Reconciler::new(existing, settings.timestamp_tolerance_ms);

        reporter.on_state_change(volume_id, JobState::Walking);
        let mut pending = PendingWrites::new(&self.store, volume_id);
        let mut throttle = ProgressThrottle::new(self.progress_interval);
        let mut processed = 0usize;
        let mut unchanged = 0usize;

        let stats = walk::walk_volume(root, settings, cancel, |entry| {
            processed += 1;
            if throttle.ready() {
                reporter.on_index_progress(volume_id, processed, &entry.relative_path);
            }
            match reconciler.classify(&entry) {
                Change::New => pending.insert(entry, cancel),
                Change::Modified { id } => pending.update(FileUpdate { id, entry }, cancel),
                Change::Unchanged => {
                    unchanged += 1;
                    Ok(())
                }
            }
        })?;
        // A volume that vanished mid-walk must not be swept empty.
        ensure_root(root)?;

        reporter.on_state_change(volume_id, JobState::Diffing);
        if !stats.unreadable.is_empty() {
            warn!(
                "{} unreadable paths on {}; their records are kept",
                stats.unreadable.len(),
                volume_id
            );
        }
        let deleted_ids = reconciler.into_deleted(&stats.unreadable);

        reporter.on_state_change(volume_id, JobState::Writing);
        pending.flush(cancel)?;
        let mut deleted = 0;
        for chunk in deleted_ids.chunks(BATCH_SIZE) {
            cancel.check()?;
            deleted += self.store.delete_files_batch(chunk)?;
        }
        reporter.on_index_progress(volume_id, processed, "");

        summary.inserted = pending.inserted;
        summary.updated = pending.updated;
        summary.unchanged = unchanged;
        summary.deleted = deleted;
        summary.total_files = stats.entries;
        summary.walk_errors = stats.errors;
        Ok(summary)
    }

    /// Compute content hashes for unhashed files at or above the size threshold.
    ///
    /// Runs independently of metadata indexing; records are searchable
    /// whether or not this ever finishes.
    pub fn hash_volume(
        &self,
        volume_id: &str,
        root: &Path,
        settings: &IndexSettings,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<HashSummary> {
        let mut summary = HashSummary::default();
        if !settings.duplicate_detection_enabled {
            debug!("Duplicate detection disabled, not hashing {}", volume_id);
            return Ok(summary);
        }
        ensure_root(root)?;

        reporter.on_hash_start(volume_id);
        let start = Instant::now();
        let min_size = settings.min_hash_size.min(i64::MAX as u64) as i64;
        let mut after_id = 0;

        loop {
            cancel.check()?;
            let batch =
                self.store
                    .files_needing_hash(volume_id, min_size, after_id, HASH_BATCH_SIZE)?;
            let Some(last) = batch.last() else {
                break;
            };
            after_id = last.id;

            let results: Vec<(&HashCandidate, io::Result<u64>)> = batch
                .par_iter()
                .map(|candidate| {
                    if cancel.is_cancelled() {
                        return (
                            candidate,
                            Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled")),
                        );
                    }
                    let result = hash::hash_file(&root.join(&candidate.relative_path));
                    (candidate, result)
                })
                .collect();

            // Nothing from a batch interrupted by cancellation is written.
            cancel.check()?;

            let mut updates = Vec::with_capacity(results.len());
            for (candidate, result) in results {
                match result {
                    Ok(hash) => updates.push(HashUpdate {
                        id: candidate.id,
                        content_hash: hash as i64,
                        duplicate_key: hash::duplicate_key(candidate.size, hash),
                    }),
                    Err(e) => {
                        summary.skipped += 1;
                        warn!(
                            "Error hashing '{}' on {}: {}",
                            candidate.relative_path, volume_id, e
                        );
                    }
                }
            }
            summary.hashed += self.store.update_hashes_batch(&updates)?;
            reporter.on_hash_progress(volume_id, summary.hashed);
        }

        summary.duration = start.elapsed();
        info!(
            "Hashed {} files on {} in {:.2}s ({} skipped)",
            summary.hashed,
            volume_id,
            summary.duration.as_secs_f64(),
            summary.skipped
        );
        reporter.on_hash_complete(volume_id, &summary);
        Ok(summary)
    }
}

fn ensure_root(root: &Path) -> Result<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(Error::NotFound(format!("volume root {}", root.display())))
    }
}
