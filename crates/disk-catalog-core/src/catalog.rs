use crate::analysis::{DuplicateAnalyzer, DuplicateGroup, VolumeRole};
use crate::config::{AppConfig, IndexSettings};
use crate::coordinator::{ChangeNotification, IndexCoordinator, RequestOutcome};
use crate::error::Result;
use crate::progress::ProgressReporter;
use crate::storage::models::FileRecord;
use crate::storage::Store;
use crate::volumes::{VolumeEvent, VolumeTracker};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A search hit annotated with the volume's current connectivity.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: i64,
    pub name: String,
    pub relative_path: String,
    pub size: i64,
    pub volume_id: String,
    pub volume_name: String,
    pub is_connected: bool,
    pub is_directory: bool,
}

/// Composition root: owns the store handle and wires every component to it.
pub struct Catalog {
    store: Arc<Store>,
    tracker: Arc<VolumeTracker>,
    coordinator: IndexCoordinator,
    analyzer: DuplicateAnalyzer,
}

impl Catalog {
    pub fn open(config: &AppConfig, reporter: Arc<dyn ProgressReporter>) -> Result<Self> {
        let store = Arc::new(Store::open_or_create(&config.database_path)?);
        Self::with_store(config, store, reporter)
    }

    pub fn with_store(
        config: &AppConfig,
        store: Arc<Store>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Self> {
        let settings = store.load_index_settings(&config.index_settings())?;
        let coordinator = IndexCoordinator::with_auto_hash(store.clone(), settings, reporter);
        let tracker = Arc::new(VolumeTracker::new(store.clone()));
        tracker.set_listener(Arc::new(coordinator.clone()));
        Ok(Self {
            analyzer: DuplicateAnalyzer::new(store.clone()),
            store,
            tracker,
            coordinator,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn tracker(&self) -> &VolumeTracker {
        &self.tracker
    }

    pub fn coordinator(&self) -> &IndexCoordinator {
        &self.coordinator
    }

    pub fn handle_volume_event(&self, event: &VolumeEvent) -> Result<()> {
        self.with_recovery(|| self.tracker.handle_event(event))
    }

    pub fn handle_change(&self, notification: &ChangeNotification) -> Result<Option<RequestOutcome>> {
        self.coordinator.notify_changes(notification)
    }

    pub fn search(&self, text: &str, limit: i64, offset: i64) -> Result<Vec<SearchResult>> {
        let hits = self.with_recovery(|| self.store.search(text, limit, offset))?;
        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                is_connected: self.tracker.is_connected(&hit.volume_id),
                id: hit.id,
                name: hit.name,
                relative_path: hit.relative_path,
                size: hit.size,
                volume_id: hit.volume_id,
                volume_name: hit.volume_name,
                is_directory: hit.is_directory,
            })
            .collect())
    }

    pub fn get_children(&self, volume_id: &str, parent_path: &str) -> Result<Vec<FileRecord>> {
        self.with_recovery(|| self.store.get_children(volume_id, parent_path))
    }

    /// Cross-volume duplicates; empty while duplicate detection is switched off.
    pub fn duplicate_groups(
        &self,
        roles: &HashMap<String, VolumeRole>,
    ) -> Result<Vec<DuplicateGroup>> {
        if !self.coordinator.settings().duplicate_detection_enabled {
            return Ok(Vec::new());
        }
        self.with_recovery(|| self.analyzer.get_duplicate_groups(roles))
    }

    pub fn settings(&self) -> IndexSettings {
        self.coordinator.settings()
    }

    /// Persist new settings. Running scans keep the snapshot they started with.
    pub fn update_settings(&self, settings: IndexSettings) -> Result<()> {
        self.with_recovery(|| self.store.save_index_settings(&settings))?;
        self.coordinator.update_settings(settings);
        Ok(())
    }

    /// Same policy as the coordinator: one recovery, one retry.
    fn with_recovery<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        match op() {
            Err(e) if e.is_recoverable() => {
                warn!("Recoverable store error, recovering and retrying once: {}", e);
                self.store.recover()?;
                op()
            }
            other => other,
        }
    }
}
