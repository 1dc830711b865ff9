use colored::*;
use disk_catalog_core::{Error, HashSummary, JobState, ProgressReporter, ScanMode, ScanSummary};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Spinner per running job. Indexing has no known total, hashing reports a running count.
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_spinner(&self, message: String) {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));

        let mut guard = self.lock();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn set_message(&self, message: String) {
        if let Some(pb) = self.lock().as_ref() {
            pb.set_message(message);
        }
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.lock().take() {
            pb.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_index_start(&self, volume_id: &str, mode: ScanMode) {
        let mode = match mode {
            ScanMode::Full => "full",
            ScanMode::Delta => "delta",
        };
        self.start_spinner(format!("Indexing {} ({} scan)...", volume_id, mode));
    }

    fn on_state_change(&self, volume_id: &str, state: JobState) {
        match state {
            JobState::Diffing => self.set_message(format!("Diffing {}...", volume_id)),
            JobState::Writing => self.set_message(format!("Writing {}...", volume_id)),
            JobState::Cancelled => {
                self.finish_bar();
                eprintln!("  {} Indexing of {} cancelled", "!".yellow(), volume_id);
            }
            _ => {}
        }
    }

    fn on_index_progress(&self, volume_id: &str, files_processed: usize, _current_path: &str) {
        self.set_message(format!(
            "Indexing {}... {} entries processed",
            volume_id, files_processed
        ));
    }

    fn on_index_complete(&self, volume_id: &str, summary: &ScanSummary) {
        self.finish_bar();
        eprintln!(
            "  {} Indexed {}: {} new, {} modified, {} unchanged, {} deleted in {:.2}s",
            "✓".green(),
            volume_id,
            summary.inserted,
            summary.updated,
            summary.unchanged,
            summary.deleted,
            summary.duration.as_secs_f64()
        );
    }

    fn on_hash_start(&self, volume_id: &str) {
        self.start_spinner(format!("Hashing {}...", volume_id));
    }

    fn on_hash_progress(&self, volume_id: &str, files_hashed: usize) {
        self.set_message(format!("Hashing {}... {} files", volume_id, files_hashed));
    }

    fn on_hash_complete(&self, volume_id: &str, summary: &HashSummary) {
        self.finish_bar();
        eprintln!(
            "  {} Hashed {}: {} files ({} unreadable) in {:.2}s",
            "✓".green(),
            volume_id,
            summary.hashed,
            summary.skipped,
            summary.duration.as_secs_f64()
        );
    }

    fn on_job_failed(&self, volume_id: &str, error: &Error, recovered: bool) {
        self.finish_bar();
        let note = if recovered { " (store was recovered)" } else { "" };
        eprintln!("  {} Job for {} failed{}: {}", "✗".red(), volume_id, note, error);
    }
}
