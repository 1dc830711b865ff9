use crate::error::Error;
use crate::indexer::{HashSummary, JobState, ScanMode, ScanSummary};
use std::time::{Duration, Instant};

/// Trait for reporting indexing progress.
///
/// The CLI implements it with indicatif spinners; embedders forward it to their UI.
/// All methods have default no-op implementations. Events are informational only.
pub trait ProgressReporter: Send + Sync {
    fn on_index_start(&self, _volume_id: &str, _mode: ScanMode) {}
    fn on_state_change(&self, _volume_id: &str, _state: JobState) {}
    fn on_index_progress(&self, _volume_id: &str, _files_processed: usize, _current_path: &str) {}
    fn on_index_complete(&self, _volume_id: &str, _summary: &ScanSummary) {}
    fn on_hash_start(&self, _volume_id: &str) {}
    fn on_hash_progress(&self, _volume_id: &str, _files_hashed: usize) {}
    fn on_hash_complete(&self, _volume_id: &str, _summary: &HashSummary) {}
    fn on_job_failed(&self, _volume_id: &str, _error: &Error, _recovered: bool) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Lets at most one progress event through per interval.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_INTERVAL)
    }
}
