use crate::cancel::CancelToken;
use crate::config::IndexSettings;
use crate::error::{Error, ErrorKind, Result};
use crate::indexer::{HashSummary, Indexer, JobState, ScanMode, ScanSummary};
use crate::progress::ProgressReporter;
use crate::storage::Store;
use crate::volumes::VolumeListener;
use dashmap::DashMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Debounced "something changed" signal. The path count is informational;
/// the engine re-diffs the whole volume.
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    pub volume_id: String,
    pub changed_path_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Started,
    /// Folded into the job already running for this volume.
    Coalesced,
}

/// Terminal result of an indexing or hashing job.
#[derive(Debug, Clone, Serialize)]
pub enum JobOutcome<T> {
    Completed(T),
    Cancelled,
    /// `recovered` is true when the store was reopened before the final
    /// attempt, i.e. the data is intact and a manual retry may succeed.
    Failed {
        kind: ErrorKind,
        message: String,
        recovered: bool,
    },
}

impl<T> JobOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }

    fn failed(err: &Error, recovered: bool) -> Self {
        JobOutcome::Failed {
            kind: err.kind(),
            message: err.to_string(),
            recovered,
        }
    }

    fn state(&self) -> JobState {
        match self {
            JobOutcome::Completed(_) => JobState::Completed,
            JobOutcome::Cancelled => JobState::Cancelled,
            JobOutcome::Failed { .. } => JobState::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexProgress {
    pub state: JobState,
    pub files_processed: usize,
    pub current_path: String,
    pub summary: Option<ScanSummary>,
}

impl Default for IndexProgress {
    fn default() -> Self {
        Self {
            state: JobState::Pending,
            files_processed: 0,
            current_path: String::new(),
            summary: None,
        }
    }
}

#[derive(Default)]
struct VolumeJobs {
    indexing: Option<CancelToken>,
    rerun: bool,
    hashing: Option<CancelToken>,
    progress: IndexProgress,
    pending_changes: usize,
    last_index: Option<JobOutcome<ScanSummary>>,
    last_hash: Option<JobOutcome<HashSummary>>,
}

struct Inner {
    store: Arc<Store>,
    indexer: Indexer,
    settings: RwLock<IndexSettings>,
    reporter: Arc<dyn ProgressReporter>,
    auto_hash: bool,
    jobs: DashMap<String, VolumeJobs>,
    roots: DashMap<String, PathBuf>,
    idle: (Mutex<()>, Condvar),
}

/// Runs indexing and hashing jobs: one of each per volume at a time,
/// different volumes in parallel, each on its own thread.
#[derive(Clone)]
pub struct IndexCoordinator {
    inner: Arc<Inner>,
}

impl IndexCoordinator {
    pub fn new(
        store: Arc<Store>,
        settings: IndexSettings,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self::build(store, settings, reporter, false)
    }

    /// Like `new`, but every completed index job is followed by a hashing job
    /// when duplicate detection is enabled.
    pub fn with_auto_hash(
        store: Arc<Store>,
        settings: IndexSettings,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self::build(store, settings, reporter, true)
    }

    fn build(
        store: Arc<Store>,
        settings: IndexSettings,
        reporter: Arc<dyn ProgressReporter>,
        auto_hash: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                indexer: Indexer::new(store.clone()),
                store,
                settings: RwLock::new(settings),
                reporter,
                auto_hash,
                jobs: DashMap::new(),
                roots: DashMap::new(),
                idle: (Mutex::new(()), Condvar::new()),
            }),
        }
    }

    /// Replace the settings used by jobs started from now on.
    pub fn update_settings(&self, settings: IndexSettings) {
        *self.inner.settings.write().unwrap_or_else(|e| e.into_inner()) = settings;
    }

    pub fn settings(&self) -> IndexSettings {
        self.inner.settings_snapshot()
    }

    /// Start indexing `volume_id` at `root` unless a job for it is already running.
    pub fn request_index(&self, volume_id: &str, root: &Path) -> Result<RequestOutcome> {
        self.inner
            .roots
            .insert(volume_id.to_string(), root.to_path_buf());
        Inner::spawn_index(&self.inner, volume_id, root.to_path_buf(), None)
    }

    /// Start a FULL rebuild regardless of previous scans.
    pub fn request_rebuild(&self, volume_id: &str, root: &Path) -> Result<RequestOutcome> {
        self.inner
            .roots
            .insert(volume_id.to_string(), root.to_path_buf());
        Inner::spawn_index(
            &self.inner,
            volume_id,
            root.to_path_buf(),
            Some(ScanMode::Full),
        )
    }

    /// Record a change signal and ask for a delta scan if the volume's root is known.
    pub fn notify_changes(&self, notification: &ChangeNotification) -> Result<Option<RequestOutcome>> {
        self.inner
            .jobs
            .entry(notification.volume_id.clone())
            .or_default()
            .pending_changes += notification.changed_path_count;

        let root = self
            .inner
            .roots
            .get(&notification.volume_id)
            .map(|r| r.value().clone());
        match root {
            Some(root) => Ok(Some(Inner::spawn_index(
                &self.inner,
                &notification.volume_id,
                root,
                None,
            )?)),
            None => {
                debug!(
                    "Change signal for unmounted volume {} kept as pending",
                    notification.volume_id
                );
                Ok(None)
            }
        }
    }

    pub fn request_hash(&self, volume_id: &str, root: &Path) -> Result<RequestOutcome> {
        Inner::spawn_hash(&self.inner, volume_id, root.to_path_buf())
    }

    /// Ask the running index job to stop after its in-flight batch. Hashing is untouched.
    pub fn cancel(&self, volume_id: &str) -> bool {
        match self.inner.jobs.get_mut(volume_id) {
            Some(mut jobs) => {
                jobs.rerun = false;
                match &jobs.indexing {
                    Some(token) => {
                        token.cancel();
                        info!("Cancellation requested for indexing of {}", volume_id);
                        true
                    }
                    None => false,
                }
            }
            None => false,
        }
    }

    pub fn cancel_hashing(&self, volume_id: &str) -> bool {
        match self.inner.jobs.get(volume_id) {
            Some(jobs) => match &jobs.hashing {
                Some(token) => {
                    token.cancel();
                    info!("Cancellation requested for hashing of {}", volume_id);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Whether `volume_id` (or, with `None`, any volume) is being indexed.
    pub fn is_indexing(&self, volume_id: Option<&str>) -> bool {
        self.inner.any_job(volume_id, |jobs| jobs.indexing.is_some())
    }

    pub fn is_hashing(&self, volume_id: Option<&str>) -> bool {
        self.inner.any_job(volume_id, |jobs| jobs.hashing.is_some())
    }

    pub fn progress(&self, volume_id: &str) -> Option<IndexProgress> {
        self.inner
            .jobs
            .get(volume_id)
            .map(|jobs| jobs.progress.clone())
    }

    pub fn pending_changes(&self, volume_id: &str) -> usize {
        self.inner
            .jobs
            .get(volume_id)
            .map(|jobs| jobs.pending_changes)
            .unwrap_or(0)
    }

    pub fn last_outcome(&self, volume_id: &str) -> Option<JobOutcome<ScanSummary>> {
        self.inner
            .jobs
            .get(volume_id)
            .and_then(|jobs| jobs.last_index.clone())
    }

    pub fn last_hash_outcome(&self, volume_id: &str) -> Option<JobOutcome<HashSummary>> {
        self.inner
            .jobs
            .get(volume_id)
            .and_then(|jobs| jobs.last_hash.clone())
    }

    /// Block until no job runs for `volume_id` (or any volume). False on timeout.
    pub fn wait_idle(&self, volume_id: Option<&str>, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &self.inner.idle;
        let mut guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        while self.is_indexing(volume_id) || self.is_hashing(volume_id) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = cvar
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        true
    }
}

impl VolumeListener for IndexCoordinator {
    fn on_volume_attached(&self, volume_id: &str, mount_path: &Path) {
        if let Err(e) = self.request_index(volume_id, mount_path) {
            error!("Could not start indexing {}: {}", volume_id, e);
        }
    }

    fn on_volume_detached(&self, volume_id: &str) {
        self.inner.roots.remove(volume_id);
        self.cancel(volume_id);
        self.cancel_hashing(volume_id);
    }
}

impl Inner {
    fn settings_snapshot(&self) -> IndexSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn any_job(&self, volume_id: Option<&str>, f: impl Fn(&VolumeJobs) -> bool) -> bool {
        match volume_id {
            Some(id) => self.jobs.get(id).map(|jobs| f(&jobs)).unwrap_or(false),
            None => self.jobs.iter().any(|entry| f(entry.value())),
        }
    }

    fn notify_idle(&self) {
        let (lock, cvar) = &self.idle;
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        cvar.notify_all();
    }

    fn spawn_index(
        this: &Arc<Self>,
        volume_id: &str,
        root: PathBuf,
        mode: Option<ScanMode>,
    ) -> Result<RequestOutcome> {
        let cancel = {
            let mut jobs = this.jobs.entry(volume_id.to_string()).or_default();
            if jobs.indexing.is_some() {
                jobs.rerun = true;
                debug!("Index request for busy volume {} coalesced", volume_id);
                return Ok(RequestOutcome::Coalesced);
            }
            let cancel = CancelToken::new();
            jobs.indexing = Some(cancel.clone());
            jobs.progress = IndexProgress::default();
            cancel
        };

        let inner = this.clone();
        let id = volume_id.to_string();
        let spawned = thread::Builder::new()
            .name(format!("index-{}", volume_id))
            .spawn(move || inner.index_loop(id, root, mode, cancel));
        if let Err(e) = spawned {
            if let Some(mut jobs) = this.jobs.get_mut(volume_id) {
                jobs.indexing = None;
            }
            return Err(e.into());
        }
        Ok(RequestOutcome::Started)
    }

    fn spawn_hash(this: &Arc<Self>, volume_id: &str, root: PathBuf) -> Result<RequestOutcome> {
        let cancel = {
            let mut jobs = this.jobs.entry(volume_id.to_string()).or_default();
            if jobs.hashing.is_some() {
                return Ok(RequestOutcome::Coalesced);
            }
            let cancel = CancelToken::new();
            jobs.hashing = Some(cancel.clone());
            cancel
        };

        let inner = this.clone();
        let id = volume_id.to_string();
        let spawned = thread::Builder::new()
            .name(format!("hash-{}", volume_id))
            .spawn(move || inner.hash_job(id, root, cancel));
        if let Err(e) = spawned {
            if let Some(mut jobs) = this.jobs.get_mut(volume_id) {
                jobs.hashing = None;
            }
            return Err(e.into());
        }
        Ok(RequestOutcome::Started)
    }

    /// Runs the requested job, then at most one coalesced follow-up per round.
    fn index_loop(
        self: Arc<Self>,
        volume_id: String,
        root: PathBuf,
        mut mode: Option<ScanMode>,
        mut cancel: CancelToken,
    ) {
        loop {
            if let Some(mut jobs) = self.jobs.get_mut(&volume_id) {
                jobs.pending_changes = 0;
            }
            let settings = self.settings_snapshot();
            let reporter = JobReporter {
                inner: self.as_ref(),
                volume_id: &volume_id,
            };
            let outcome = self.with_recovery(&volume_id, || match mode {
                Some(mode) => self.indexer.index_volume_with_mode(
                    &volume_id, &root, mode, &settings, &cancel, &reporter,
                ),
                None => self
                    .indexer
                    .index_volume(&volume_id, &root, &settings, &cancel, &reporter),
            });
            if matches!(outcome, JobOutcome::Cancelled) {
                info!("Indexing of {} cancelled", volume_id);
            }
            if !outcome.is_completed() {
                self.reporter.on_state_change(&volume_id, outcome.state());
            }

            let completed = outcome.is_completed();
            // Hashing is registered before indexing is cleared so waiters never see a gap.
            if completed && self.auto_hash && settings.duplicate_detection_enabled {
                if let Err(e) = Inner::spawn_hash(&self, &volume_id, root.clone()) {
                    error!("Could not start hashing {}: {}", volume_id, e);
                }
            }

            let rerun = {
                let mut jobs = self.jobs.entry(volume_id.clone()).or_default();
                jobs.progress.state = outcome.state();
                if let JobOutcome::Completed(summary) = &outcome {
                    jobs.progress.summary = Some(summary.clone());
                }
                jobs.last_index = Some(outcome);

                if jobs.rerun && completed {
                    jobs.rerun = false;
                    cancel = CancelToken::new();
                    jobs.indexing = Some(cancel.clone());
                    jobs.progress = IndexProgress::default();
                    true
                } else {
                    jobs.rerun = false;
                    jobs.indexing = None;
                    false
                }
            };

            if !rerun {
                break;
            }
            debug!("Running coalesced follow-up scan for {}", volume_id);
            mode = None;
        }
        self.notify_idle();
    }

    fn hash_job(self: Arc<Self>, volume_id: String, root: PathBuf, cancel: CancelToken) {
        let settings = self.settings_snapshot();
        let outcome = self.with_recovery(&volume_id, || {
            self.indexer.hash_volume(
                &volume_id,
                &root,
                &settings,
                &cancel,
                self.reporter.as_ref(),
            )
        });
        if matches!(outcome, JobOutcome::Cancelled) {
            info!("Hashing of {} cancelled", volume_id);
        }
        {
            let mut jobs = self.jobs.entry(volume_id.clone()).or_default();
            jobs.last_hash = Some(outcome);
            jobs.hashing = None;
        }
        self.notify_idle();
    }

    /// One attempt; on a recoverable failure reopen the store and try exactly once more.
    fn with_recovery<T>(&self, volume_id: &str, mut op: impl FnMut() -> Result<T>) -> JobOutcome<T> {
        let err = match op() {
            Ok(value) => return JobOutcome::Completed(value),
            Err(Error::Cancelled) => return JobOutcome::Cancelled,
            Err(e) => e,
        };

        if !err.is_recoverable() {
            error!("Job for {} failed: {}", volume_id, err);
            self.reporter.on_job_failed(volume_id, &err, false);
            return JobOutcome::failed(&err, false);
        }

        warn!(
            "Job for {} hit a recoverable error, recovering store and retrying: {}",
            volume_id, err
        );
        if let Err(recover_err) = self.store.recover() {
            error!("Store recovery failed: {}", recover_err);
            self.reporter.on_job_failed(volume_id, &recover_err, false);
            return JobOutcome::failed(&recover_err, false);
        }

        match op() {
            Ok(value) => JobOutcome::Completed(value),
            Err(Error::Cancelled) => JobOutcome::Cancelled,
            Err(retry_err) => {
                error!("Job for {} failed after recovery: {}", volume_id, retry_err);
                self.reporter.on_job_failed(volume_id, &retry_err, true);
                JobOutcome::failed(&retry_err, true)
            }
        }
    }
}

/// Mirrors indexer events into the volume's progress snapshot, then forwards them.
struct JobReporter<'a> {
    inner: &'a Inner,
    volume_id: &'a str,
}

impl ProgressReporter for JobReporter<'_> {
    fn on_index_start(&self, volume_id: &str, mode: ScanMode) {
        self.inner.reporter.on_index_start(volume_id, mode);
    }

    fn on_state_change(&self, volume_id: &str, state: JobState) {
        if let Some(mut jobs) = self.inner.jobs.get_mut(self.volume_id) {
            jobs.progress.state = state;
        }
        self.inner.reporter.on_state_change(volume_id, state);
    }

    fn on_index_progress(&self, volume_id: &str, files_processed: usize, current_path: &str) {
        if let Some(mut jobs) = self.inner.jobs.get_mut(self.volume_id) {
            jobs.progress.files_processed = files_processed;
            jobs.progress.current_path = current_path.to_string();
        }
        self.inner
            .reporter
            .on_index_progress(volume_id, files_processed, current_path);
    }

    fn on_index_complete(&self, volume_id: &str, summary: &ScanSummary) {
        self.inner.reporter.on_index_complete(volume_id, summary);
    }
}
