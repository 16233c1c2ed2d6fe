use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, info, warn};

use super::kill::{SignalOutcome, send_signal};
use super::platform;
use super::snapshot::{
    AppMetadata, AppSetFilter, ComponentName, Importance, ProcessSnapshot, ServiceSnapshot,
};
use super::source::{MetadataResolver, Result, SnapshotSource, SourceError};
use crate::config::{
    ALL_SET_ID, ClearConfig, CollectorConfig, Config, SYSTEM_SET_ID, THIRD_PARTY_SET_ID,
};

/// Live snapshot source backed by `sysinfo` and per-platform memory lookups.
pub struct Collector {
    state: Mutex<CollectorState>,
    settings: CollectorConfig,
    clear: ClearConfig,
    labels: BTreeMap<String, String>,
    app_sets: Vec<AppSetFilter>,
}

struct CollectorState {
    sys: System,
    /// Packages seen running, with their executable path when known.
    catalog: BTreeMap<String, Option<String>>,
}

impl Collector {
    pub fn new(config: &Config) -> Self {
        let mut sys = System::new();
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind());
        let mut state = CollectorState {
            sys,
            catalog: BTreeMap::new(),
        };
        state.record_catalog();
        Collector {
            state: Mutex::new(state),
            settings: config.collector.clone(),
            clear: config.clear.clone(),
            labels: config.labels.clone(),
            app_sets: config.app_sets.clone(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CollectorState>> {
        self.state
            .lock()
            .map_err(|_| SourceError::Unavailable("collector state poisoned".to_string()))
    }

    fn is_system_path(&self, exe: Option<&str>) -> bool {
        match exe {
            Some(path) => self
                .settings
                .system_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str())),
            None => true,
        }
    }

    fn importance_of(&self, process: &Process, pid: u32) -> Importance {
        let in_service = platform::process_service_unit(pid).is_some();
        classify(
            process.status(),
            process.cpu_usage(),
            in_service,
            self.settings.active_cpu_threshold,
        )
    }
}

impl CollectorState {
    fn refresh(&mut self) {
        self.sys
            .refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind());
        self.record_catalog();
    }

    fn record_catalog(&mut self) {
        for process in self.sys.processes().values() {
            if let Some((package, exe)) = package_of(process) {
                self.catalog.entry(package).or_insert(exe);
            }
        }
    }

    fn sorted_processes(&self) -> Vec<(u32, &Process)> {
        let mut procs: Vec<(u32, &Process)> = self
            .sys
            .processes()
            .iter()
            .map(|(pid, p)| (pid.as_u32(), p))
            .collect();
        procs.sort_unstable_by_key(|(pid, _)| *pid);
        procs
    }
}

fn refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing()
        .with_memory()
        .with_cpu()
        .with_exe(UpdateKind::OnlyIfNotSet)
        .with_cmd(UpdateKind::OnlyIfNotSet)
        .with_user(UpdateKind::OnlyIfNotSet)
}

/// Package owning a process: its executable name, or the process name for
/// interpreters without a resolvable exe. Kernel threads have neither.
fn package_of(process: &Process) -> Option<(String, Option<String>)> {
    if let Some(exe) = process.exe()
        && let Some(name) = exe.file_name()
    {
        return Some((
            name.to_string_lossy().to_string(),
            Some(exe.display().to_string()),
        ));
    }
    if process.cmd().is_empty() {
        return None;
    }
    let name = process.name().to_string_lossy().to_string();
    if name.is_empty() { None } else { Some((name, None)) }
}

pub fn classify(status: ProcessStatus, cpu: f32, in_service: bool, active_threshold: f32) -> Importance {
    match status {
        ProcessStatus::Run => Importance::Foreground,
        ProcessStatus::Zombie | ProcessStatus::Dead => Importance::Gone,
        ProcessStatus::Stop | ProcessStatus::Idle => Importance::Cached,
        _ if cpu >= active_threshold => Importance::Visible,
        _ if in_service => Importance::Service,
        _ => Importance::Cached,
    }
}

impl MetadataResolver for Collector {
    fn resolve_app_metadata(&self, package: &str) -> Result<AppMetadata> {
        let icon = {
            let state = self.lock()?;
            match state.catalog.get(package) {
                Some(exe) => exe.clone(),
                None if self.app_sets.iter().any(|s| s.packages.iter().any(|p| p == package)) => {
                    None
                }
                None => return Err(SourceError::NotFound(package.to_string())),
            }
        };
        let label = self
            .labels
            .get(package)
            .cloned()
            .unwrap_or_else(|| package.to_string());
        Ok(AppMetadata {
            package: package.to_string(),
            label,
            icon,
        })
    }
}

impl SnapshotSource for Collector {
    fn list_running_processes(&self) -> Result<Vec<ProcessSnapshot>> {
        let _span = tracing::debug_span!("collector.list_running_processes").entered();
        let mut state = self.lock()?;
        state.refresh();

        let snapshots: Vec<ProcessSnapshot> = state
            .sorted_processes()
            .into_iter()
            .map(|(pid, process)| ProcessSnapshot {
                pid,
                process_name: process.name().to_string_lossy().to_string(),
                packages: package_of(process).map(|(p, _)| vec![p]).unwrap_or_default(),
                importance: self.importance_of(process, pid),
                memory_bytes: process.memory(),
            })
            .collect();
        debug!(count = snapshots.len(), "listed running processes");
        Ok(snapshots)
    }

    fn list_running_services(&self, limit: usize) -> Result<Vec<ServiceSnapshot>> {
        let state = self.lock()?;
        let services: Vec<ServiceSnapshot> = state
            .sorted_processes()
            .into_iter()
            .filter_map(|(pid, process)| {
                let unit = platform::process_service_unit(pid)?;
                let (package, _) = package_of(process)?;
                Some(ServiceSnapshot {
                    pid,
                    component: ComponentName::new(package, unit),
                    client_package: None,
                    client_label: 0,
                })
            })
            .take(limit)
            .collect();
        debug!(count = services.len(), "listed running services");
        Ok(services)
    }

    fn query_memory_bytes(&self, pids: &[u32]) -> Result<u64> {
        let state = self.lock()?;
        let kib: u64 = pids
            .iter()
            .map(|&pid| {
                platform::process_pss_kib(pid).unwrap_or_else(|| {
                    // No PSS on this platform or access denied: resident size.
                    // A pid that vanished since listing counts as zero.
                    state
                        .sys
                        .process(Pid::from_u32(pid))
                        .map(|p| p.memory() / 1024)
                        .unwrap_or(0)
                })
            })
            .sum();
        Ok(kib * 1024)
    }

    fn service_label(&self, component: &ComponentName) -> Result<Option<String>> {
        Ok(self.labels.get(&component.class_name).cloned())
    }

    fn client_label(&self, package: &str, _label_ref: i32) -> Result<String> {
        Err(SourceError::NotFound(package.to_string()))
    }

    fn list_app_set_filters(&self) -> Result<Vec<AppSetFilter>> {
        let state = self.lock()?;
        let mut third_party = Vec::new();
        let mut system = Vec::new();
        for (package, exe) in &state.catalog {
            if self.is_system_path(exe.as_deref()) {
                system.push(package.clone());
            } else {
                third_party.push(package.clone());
            }
        }
        let all: Vec<String> = state.catalog.keys().cloned().collect();

        let mut filters = vec![
            AppSetFilter {
                id: THIRD_PARTY_SET_ID.to_string(),
                label: "Third-party apps".to_string(),
                packages: third_party,
            },
            AppSetFilter {
                id: SYSTEM_SET_ID.to_string(),
                label: "System apps".to_string(),
                packages: system,
            },
            AppSetFilter {
                id: ALL_SET_ID.to_string(),
                label: "All apps".to_string(),
                packages: all,
            },
        ];
        filters.extend(self.app_sets.iter().cloned());
        Ok(filters)
    }

    fn send_clear_background_tasks(&self) -> Result<()> {
        if !self.clear.enabled {
            warn!("clear command ignored: set clear.enabled = true to allow signalling processes");
            return Ok(());
        }

        let mut state = self.lock()?;
        state.refresh();

        let me = sysinfo::get_current_pid().ok();
        let my_uid = me
            .and_then(|pid| state.sys.process(pid))
            .and_then(|p| p.user_id().cloned());

        let mut delivered = 0usize;
        for (pid, process) in state.sorted_processes() {
            if Some(Pid::from_u32(pid)) == me || package_of(process).is_none() {
                continue;
            }
            if self.clear.current_user_only && process.user_id() != my_uid.as_ref() {
                continue;
            }
            if !self.importance_of(process, pid).is_cached() {
                continue;
            }
            match send_signal(&state.sys, pid, self.clear.signal) {
                SignalOutcome::Delivered(..) => delivered += 1,
                SignalOutcome::Failed(_, err) => debug!(pid, error = %err, "trim signal failed"),
                SignalOutcome::NotFound(_) => {}
            }
        }
        info!(delivered, signal = self.clear.signal.name(), "cleared background processes");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_status_to_importance() {
        assert_eq!(classify(ProcessStatus::Run, 0.0, false, 1.0), Importance::Foreground);
        assert_eq!(classify(ProcessStatus::Zombie, 0.0, false, 1.0), Importance::Gone);
        assert_eq!(classify(ProcessStatus::Idle, 50.0, true, 1.0), Importance::Cached);
        assert_eq!(classify(ProcessStatus::Sleep, 5.0, false, 1.0), Importance::Visible);
        assert_eq!(classify(ProcessStatus::Sleep, 0.0, true, 1.0), Importance::Service);
        assert_eq!(classify(ProcessStatus::Sleep, 0.0, false, 1.0), Importance::Cached);
    }

    #[test]
    fn live_listing_includes_current_process() {
        let collector = Collector::new(&Config::default());
        let processes = collector.list_running_processes().unwrap();
        let me = std::process::id();
        assert!(processes.iter().any(|p| p.pid == me));
        let pids: Vec<u32> = processes.iter().map(|p| p.pid).collect();
        let mut sorted = pids.clone();
        sorted.sort_unstable();
        assert_eq!(pids, sorted);
    }

    #[test]
    fn presets_are_always_listed() {
        let collector = Collector::new(&Config::default());
        let filters = collector.list_app_set_filters().unwrap();
        let ids: Vec<&str> = filters.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(&ids[..3], &[THIRD_PARTY_SET_ID, SYSTEM_SET_ID, ALL_SET_ID]);
    }

    #[test]
    fn unknown_package_is_not_found() {
        let collector = Collector::new(&Config::default());
        let err = collector
            .resolve_app_metadata("definitely-not-a-running-package")
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[test]
    fn configured_packages_resolve_with_labels() {
        let mut config = Config::default();
        config.labels.insert("ghost-app".into(), "Ghost".into());
        config.app_sets.push(AppSetFilter {
            id: "custom".into(),
            label: "Custom".into(),
            packages: vec!["ghost-app".into()],
        });
        let collector = Collector::new(&config);
        let meta = collector.resolve_app_metadata("ghost-app").unwrap();
        assert_eq!(meta.label, "Ghost");
        assert_eq!(meta.icon, None);
        let set = collector.resolve_app_set("custom").unwrap();
        assert_eq!(set.packages, vec!["ghost-app"]);
    }

    #[test]
    fn disabled_clear_is_a_no_op() {
        let collector = Collector::new(&Config::default());
        assert!(collector.send_clear_background_tasks().is_ok());
    }
}
