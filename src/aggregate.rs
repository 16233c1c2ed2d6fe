//! Groups raw process and service snapshots into per-app memory views.
//!
//! Processes are attributed to the first package they declare. Services are
//! matched to processes by pid. Memory is queried once per process and once
//! per app group: the source may round each query, so app totals are never
//! derived by summing process sizes.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::format::format_bytes;
use crate::system::snapshot::{AppMetadata, ProcessSnapshot, ServiceSnapshot};
use crate::system::source::{SnapshotSource, SourceError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningService {
    pub service: ServiceSnapshot,
    pub label: String,
    pub client_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningProcessState {
    pub process: ProcessSnapshot,
    pub services: Vec<RunningService>,
    /// Packages the process also hosts besides the one it is grouped under.
    pub shared_packages: Vec<String>,
    pub memory_bytes: u64,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningAppState {
    pub app: AppMetadata,
    /// Most services first; ties keep discovery order.
    pub processes: Vec<RunningProcessState>,
    pub all_cached: bool,
    pub total_memory_bytes: u64,
    pub size: String,
}

impl RunningAppState {
    pub fn package(&self) -> &str {
        &self.app.package
    }

    pub fn has_shared_processes(&self) -> bool {
        self.processes.iter().any(|p| !p.shared_packages.is_empty())
    }

    pub fn service_count(&self) -> usize {
        self.processes.iter().map(|p| p.services.len()).sum()
    }
}

/// Metadata lookup failed for a package the view needs.
#[derive(Error, Debug)]
#[error("cannot resolve metadata for {package}: {source}")]
pub struct ResolveError {
    pub package: String,
    pub source: SourceError,
}

#[derive(Debug, Default)]
pub struct Aggregation {
    /// One entry per owning package, in first-discovery order.
    pub apps: Vec<RunningAppState>,
    /// Groups dropped because their metadata could not be resolved.
    pub failures: Vec<ResolveError>,
}

impl Aggregation {
    /// Fails on the first unresolved group instead of skipping it.
    pub fn into_strict(self) -> Result<Vec<RunningAppState>, ResolveError> {
        match self.failures.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.apps),
        }
    }
}

pub fn aggregate<S>(
    processes: &[ProcessSnapshot],
    services: &[ServiceSnapshot],
    source: &S,
) -> Aggregation
where
    S: SnapshotSource + ?Sized,
{
    let _span = tracing::debug_span!("pipeline.aggregate", processes = processes.len()).entered();

    let mut groups: Vec<(&str, Vec<&ProcessSnapshot>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut unattributed = 0usize;
    for process in processes {
        let Some(package) = process.primary_package() else {
            unattributed += 1;
            continue;
        };
        match index.get(package) {
            Some(&i) => groups[i].1.push(process),
            None => {
                index.insert(package, groups.len());
                groups.push((package, vec![process]));
            }
        }
    }

    let mut services_by_pid: HashMap<u32, Vec<&ServiceSnapshot>> = HashMap::new();
    for service in services {
        services_by_pid.entry(service.pid).or_default().push(service);
    }

    let mut result = Aggregation::default();
    for (package, members) in groups {
        let app = match source.resolve_app_metadata(package) {
            Ok(app) => app,
            Err(source_err) => {
                result.failures.push(ResolveError {
                    package: package.to_string(),
                    source: source_err,
                });
                continue;
            }
        };

        let mut process_states: Vec<RunningProcessState> = members
            .iter()
            .map(|process| {
                let running_services: Vec<RunningService> = services_by_pid
                    .get(&process.pid)
                    .map(|matched| {
                        matched
                            .iter()
                            .map(|service| RunningService {
                                label: resolve_service_label(source, service),
                                client_label: resolve_client_label(source, service),
                                service: (*service).clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let memory_bytes = query_memory(source, &[process.pid]);
                RunningProcessState {
                    process: (*process).clone(),
                    services: running_services,
                    shared_packages: process.packages.iter().skip(1).cloned().collect(),
                    memory_bytes,
                    size: format_bytes(memory_bytes),
                }
            })
            .collect();
        process_states.sort_by(|a, b| b.services.len().cmp(&a.services.len()));

        let pids: Vec<u32> = members.iter().map(|p| p.pid).collect();
        let total_memory_bytes = source.query_memory_bytes(&pids).unwrap_or_else(|err| {
            // Only the failing pids count as zero
            warn!(package, error = %err, "group memory query failed, summing per-process sizes");
            process_states.iter().map(|p| p.memory_bytes).sum()
        });

        result.apps.push(RunningAppState {
            app,
            all_cached: members.iter().all(|p| p.importance.is_cached()),
            processes: process_states,
            total_memory_bytes,
            size: format_bytes(total_memory_bytes),
        });
    }

    debug!(
        apps = result.apps.len(),
        unresolved = result.failures.len(),
        unattributed,
        "aggregated running apps"
    );
    result
}

/// Label for a running service. Never fails: services without a label of
/// their own, or whose lookup errors, get the short class name.
pub fn resolve_service_label<S>(source: &S, service: &ServiceSnapshot) -> String
where
    S: SnapshotSource + ?Sized,
{
    match source.service_label(&service.component) {
        Ok(Some(label)) if !label.is_empty() => label,
        Ok(_) => service.component.short_class_name().to_string(),
        Err(err) => {
            debug!(class = %service.component.class_name, error = %err, "service label lookup failed");
            service.component.short_class_name().to_string()
        }
    }
}

fn resolve_client_label<S>(source: &S, service: &ServiceSnapshot) -> Option<String>
where
    S: SnapshotSource + ?Sized,
{
    let package = service.client_package.as_deref()?;
    if service.client_label <= 0 {
        return None;
    }
    source
        .client_label(package, service.client_label)
        .map_err(|err| debug!(package, error = %err, "client label lookup failed"))
        .ok()
}

fn query_memory<S>(source: &S, pids: &[u32]) -> u64
where
    S: SnapshotSource + ?Sized,
{
    source.query_memory_bytes(pids).unwrap_or_else(|err| {
        // Processes can exit between listing and querying
        warn!(?pids, error = %err, "memory query failed, counting as zero");
        0
    })
}
