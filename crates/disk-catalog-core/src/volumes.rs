use crate::error::Result;
use crate::storage::models::{Volume, VolumeInfo};
use crate::storage::Store;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Attach/detach notification from the platform, keyed by stable volume identity.
#[derive(Debug, Clone)]
pub struct VolumeEvent {
    pub volume_id: String,
    pub name: String,
    pub mount_path: PathBuf,
    pub total_capacity: i64,
    pub available_capacity: i64,
    pub is_connected: bool,
}

impl VolumeEvent {
    fn info(&self) -> VolumeInfo {
        VolumeInfo {
            id: self.volume_id.clone(),
            name: self.name.clone(),
            total_capacity: self.total_capacity,
            available_capacity: self.available_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VolumeState {
    /// Persisted and currently mounted.
    Online,
    /// Persisted but not mounted; its records stay browsable.
    Offline,
    /// Mounted and seen for the first time.
    New,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeStatus {
    pub volume: Volume,
    pub state: VolumeState,
    pub mount_path: Option<PathBuf>,
}

/// Receives attach/detach signals; implemented by the index coordinator.
pub trait VolumeListener: Send + Sync {
    fn on_volume_attached(&self, volume_id: &str, mount_path: &Path);
    fn on_volume_detached(&self, _volume_id: &str) {}
}

/// Maps volume identity to its current mount path and persisted metadata.
pub struct VolumeTracker {
    store: Arc<Store>,
    mounted: RwLock<HashMap<String, PathBuf>>,
    listener: RwLock<Option<Arc<dyn VolumeListener>>>,
}

impl VolumeTracker {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            mounted: RwLock::new(HashMap::new()),
            listener: RwLock::new(None),
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn VolumeListener>) {
        *self.listener.write().unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    fn listener(&self) -> Option<Arc<dyn VolumeListener>> {
        self.listener
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Apply one attach/detach event. Attaching a volume that is not excluded
    /// signals the listener.
    pub fn handle_event(&self, event: &VolumeEvent) -> Result<()> {
        if event.is_connected {
            self.store.upsert_volume(&event.info())?;
            self.mounted
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(event.volume_id.clone(), event.mount_path.clone());

            let excluded = self
                .store
                .get_volume(&event.volume_id)?
                .map(|v| v.is_excluded)
                .unwrap_or(false);
            info!(
                "Volume {} ({}) attached at {}{}",
                event.name,
                event.volume_id,
                event.mount_path.display(),
                if excluded { " [excluded]" } else { "" }
            );
            if !excluded {
                if let Some(listener) = self.listener() {
                    listener.on_volume_attached(&event.volume_id, &event.mount_path);
                }
            }
        } else {
            self.mounted
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&event.volume_id);
            self.store.touch_volume(&event.volume_id)?;
            info!("Volume {} ({}) detached", event.name, event.volume_id);
            if let Some(listener) = self.listener() {
                listener.on_volume_detached(&event.volume_id);
            }
        }
        Ok(())
    }

    /// Reconcile persisted volumes with what is mounted right now.
    ///
    /// Mounted volumes that are not excluded are signalled to the listener
    /// the same way an attach event is.
    pub fn load_volumes(&self, mounted: &[VolumeEvent]) -> Result<Vec<VolumeStatus>> {
        let persisted: HashSet<String> = self
            .store
            .list_volumes()?
            .into_iter()
            .map(|v| v.id)
            .collect();

        let mut paths = HashMap::new();
        let mut states = HashMap::new();
        for event in mounted.iter().filter(|e| e.is_connected) {
            self.store.upsert_volume(&event.info())?;
            let state = if persisted.contains(&event.volume_id) {
                VolumeState::Online
            } else {
                VolumeState::New
            };
            states.insert(event.volume_id.clone(), state);
            paths.insert(event.volume_id.clone(), event.mount_path.clone());
        }

        let statuses: Vec<VolumeStatus> = self
            .store
            .list_volumes()?
            .into_iter()
            .map(|volume| VolumeStatus {
                state: states
                    .get(&volume.id)
                    .copied()
                    .unwrap_or(VolumeState::Offline),
                mount_path: paths.get(&volume.id).cloned(),
                volume,
            })
            .collect();

        debug!(
            "Loaded {} volumes ({} mounted)",
            statuses.len(),
            paths.len()
        );
        *self.mounted.write().unwrap_or_else(|e| e.into_inner()) = paths;

        if let Some(listener) = self.listener() {
            for status in &statuses {
                if let (Some(path), false) = (&status.mount_path, status.volume.is_excluded) {
                    listener.on_volume_attached(&status.volume.id, path);
                }
            }
        }
        Ok(statuses)
    }

    pub fn exclude_volume(&self, volume_id: &str) -> Result<()> {
        self.store.set_volume_excluded(volume_id, true)?;
        info!("Volume {} excluded from indexing", volume_id);
        Ok(())
    }

    pub fn unexclude_volume(&self, volume_id: &str) -> Result<()> {
        self.store.set_volume_excluded(volume_id, false)?;
        info!("Volume {} included in indexing", volume_id);
        Ok(())
    }

    /// Delete the volume and all of its records. Returns the number of records removed.
    pub fn delete_volume(&self, volume_id: &str) -> Result<usize> {
        let removed = self.store.delete_volume(volume_id)?;
        self.mounted
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(volume_id);
        info!("Volume {} deleted with {} records", volume_id, removed);
        Ok(removed)
    }

    pub fn mount_path(&self, volume_id: &str) -> Option<PathBuf> {
        self.mounted
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(volume_id)
            .cloned()
    }

    pub fn is_connected(&self, volume_id: &str) -> bool {
        self.mounted
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(volume_id)
    }
}
