use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::snapshot::{AppMetadata, AppSetFilter, ComponentName, ProcessSnapshot, ServiceSnapshot};
use super::source::{MetadataResolver, Result, SnapshotSource, SourceError};

/// Recorded device state, as loaded from a JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureData {
    pub processes: Vec<ProcessSnapshot>,
    pub services: Vec<ServiceSnapshot>,
    pub apps: Vec<AppMetadata>,
    pub app_sets: Vec<AppSetFilter>,
    /// Service labels keyed by component class name.
    pub service_labels: HashMap<String, String>,
    /// Client labels keyed by `"<package>:<label_ref>"`.
    pub client_labels: HashMap<String, String>,
    /// Memory queries touching these pids fail with permission denied.
    pub denied_pids: Vec<u32>,
    /// Memory queries round down to a multiple of this many bytes; 0 or 1 is exact.
    pub memory_granularity: u64,
}

/// Snapshot source replaying a [`FixtureData`] document.
pub struct FixtureSource {
    data: Mutex<FixtureData>,
    unavailable: AtomicBool,
    clear_requests: AtomicUsize,
}

impl FixtureSource {
    pub fn new(data: FixtureData) -> Self {
        Self {
            data: Mutex::new(data),
            unavailable: AtomicBool::new(false),
            clear_requests: AtomicUsize::new(0),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Swaps in new device state, as if the system changed between refreshes.
    pub fn replace(&self, data: FixtureData) {
        if let Ok(mut guard) = self.data.lock() {
            *guard = data;
        }
    }

    /// Makes process listing fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn clear_requests(&self) -> usize {
        self.clear_requests.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, FixtureData>> {
        self.data
            .lock()
            .map_err(|_| SourceError::Unavailable("fixture state poisoned".to_string()))
    }
}

impl MetadataResolver for FixtureSource {
    fn resolve_app_metadata(&self, package: &str) -> Result<AppMetadata> {
        self.lock()?
            .apps
            .iter()
            .find(|a| a.package == package)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(package.to_string()))
    }
}

impl SnapshotSource for FixtureSource {
    fn list_running_processes(&self) -> Result<Vec<ProcessSnapshot>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("fixture marked unavailable".to_string()));
        }
        Ok(self.lock()?.processes.clone())
    }

    fn list_running_services(&self, limit: usize) -> Result<Vec<ServiceSnapshot>> {
        Ok(self.lock()?.services.iter().take(limit).cloned().collect())
    }

    fn query_memory_bytes(&self, pids: &[u32]) -> Result<u64> {
        let data = self.lock()?;
        if let Some(pid) = pids.iter().find(|pid| data.denied_pids.contains(pid)) {
            return Err(SourceError::PermissionDenied(format!("memory of pid {pid}")));
        }
        let bytes: u64 = pids
            .iter()
            .filter_map(|pid| data.processes.iter().find(|p| p.pid == *pid))
            .map(|p| p.memory_bytes)
            .sum();
        let granularity = data.memory_granularity.max(1);
        Ok(bytes / granularity * granularity)
    }

    fn service_label(&self, component: &ComponentName) -> Result<Option<String>> {
        Ok(self.lock()?.service_labels.get(&component.class_name).cloned())
    }

    fn client_label(&self, package: &str, label_ref: i32) -> Result<String> {
        let key = format!("{package}:{label_ref}");
        self.lock()?
            .client_labels
            .get(&key)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(key))
    }

    fn list_app_set_filters(&self) -> Result<Vec<AppSetFilter>> {
        Ok(self.lock()?.app_sets.clone())
    }

    fn send_clear_background_tasks(&self) -> Result<()> {
        self.clear_requests.fetch_add(1, Ordering::SeqCst);
        let mut data = self.lock()?;
        let before = data.processes.len();
        data.processes.retain(|p| !p.importance.is_cached());
        let live: Vec<u32> = data.processes.iter().map(|p| p.pid).collect();
        data.services.retain(|s| live.contains(&s.pid));
        debug!(removed = before - data.processes.len(), "fixture cleared cached processes");
        Ok(())
    }
}
