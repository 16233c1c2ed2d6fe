use thiserror::Error;

use super::snapshot::{AppMetadata, AppSetFilter, ComponentName, ProcessSnapshot, ServiceSnapshot};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("package not found: {0}")]
    NotFound(String),
    #[error("app set not found: {0}")]
    AppSetNotFound(String),
    #[error("snapshot source unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SourceError>;

pub trait MetadataResolver {
    /// Fails with [`SourceError::NotFound`] when the package is unknown.
    fn resolve_app_metadata(&self, package: &str) -> Result<AppMetadata>;
}

/// Raw process/service telemetry plus the lookups needed to attribute it to apps.
///
/// Calls may block (syscalls, file reads); callers on an async runtime should
/// go through `spawn_blocking`.
pub trait SnapshotSource: MetadataResolver + Send + Sync {
    fn list_running_processes(&self) -> Result<Vec<ProcessSnapshot>>;

    fn list_running_services(&self, limit: usize) -> Result<Vec<ServiceSnapshot>>;

    /// Aggregate memory of the given pids in bytes. Rounding is up to the source.
    fn query_memory_bytes(&self, pids: &[u32]) -> Result<u64>;

    /// `Ok(None)` when the service declares no label of its own.
    fn service_label(&self, component: &ComponentName) -> Result<Option<String>>;

    fn client_label(&self, package: &str, label_ref: i32) -> Result<String>;

    fn list_app_set_filters(&self) -> Result<Vec<AppSetFilter>>;

    /// Current contents of the app set with the given id.
    fn resolve_app_set(&self, id: &str) -> Result<AppSetFilter> {
        self.list_app_set_filters()?
            .into_iter()
            .find(|f| f.id == id)
            .ok_or_else(|| SourceError::AppSetNotFound(id.to_string()))
    }

    fn send_clear_background_tasks(&self) -> Result<()>;
}
