//! Owns the process view state and serializes every mutation through one task.
//!
//! Handles enqueue [`Command`]s; the task applies them in order, runs the
//! aggregation pipeline on the blocking pool and publishes whole-value
//! [`ViewState`] replacements to subscribers. At most one pipeline run is in
//! flight; refreshes requested meanwhile collapse into a single follow-up run.
//! Each run carries a sequence number so an older result can never overwrite
//! newer data.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::action::Command;
use crate::aggregate::{RunningAppState, aggregate};
use crate::config::{Config, SettleConfig};
use crate::rank::{Collation, Selection, select};
use crate::system::snapshot::{AppMetadata, AppSetFilter};
use crate::system::source::{SnapshotSource, SourceError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    /// Bumped on every published update.
    pub version: u64,
    /// Sequence of the refresh whose data is shown; 0 before the first one.
    pub refresh_seq: u64,
    pub loading: bool,
    pub selected_filter: Option<AppSetFilter>,
    pub running: Vec<RunningAppState>,
    pub running_background: Vec<RunningAppState>,
    pub not_running: Vec<AppMetadata>,
    pub filter_options: Vec<AppSetFilter>,
}

impl Default for ViewState {
    fn default() -> Self {
        ViewState {
            version: 0,
            refresh_seq: 0,
            loading: true,
            selected_filter: None,
            running: Vec::new(),
            running_background: Vec::new(),
            not_running: Vec::new(),
            filter_options: Vec::new(),
        }
    }
}

impl ViewState {
    /// Equality ignoring the version and refresh sequence bookkeeping.
    pub fn same_content(&self, other: &ViewState) -> bool {
        self.loading == other.loading
            && self.selected_filter == other.selected_filter
            && self.running == other.running
            && self.running_background == other.running_background
            && self.not_running == other.not_running
            && self.filter_options == other.filter_options
    }

    pub fn selected_filter_id(&self) -> Option<&str> {
        self.selected_filter.as_ref().map(|f| f.id.as_str())
    }
}

/// Result of one pipeline run.
#[derive(Debug)]
pub struct PipelineOutput {
    /// Id of the filter selected when the run started.
    pub requested_filter: Option<String>,
    /// The filter as re-resolved by the source during the run.
    pub filter: Option<AppSetFilter>,
    pub selection: Selection,
}

/// Snapshot → aggregate → select, against the source's current state.
pub fn run_pipeline(
    source: &dyn SnapshotSource,
    filter: Option<&AppSetFilter>,
    collation: &dyn Collation,
    service_limit: usize,
) -> Result<PipelineOutput, SourceError> {
    let _span = tracing::debug_span!("pipeline.refresh").entered();

    let fresh_filter = filter.map(|f| {
        source.resolve_app_set(&f.id).unwrap_or_else(|err| {
            debug!(filter = %f.id, error = %err, "keeping stored app set contents");
            f.clone()
        })
    });

    let processes = source.list_running_processes()?;
    let services = source.list_running_services(service_limit).unwrap_or_else(|err| {
        warn!(error = %err, "service listing failed, continuing without services");
        Vec::new()
    });

    let aggregation = aggregate(&processes, &services, source);
    for failure in &aggregation.failures {
        warn!(package = %failure.package, error = %failure.source, "skipping running app");
    }

    let selection = select(aggregation.apps, fresh_filter.as_ref(), source, collation);
    for failure in &selection.unresolved {
        warn!(package = %failure.package, error = %failure.source, "skipping app that is not running");
    }

    Ok(PipelineOutput {
        requested_filter: filter.map(|f| f.id.clone()),
        filter: fresh_filter,
        selection,
    })
}

/// Single-writer state holder with refresh sequencing.
#[derive(Debug, Default)]
pub struct Store {
    state: Arc<ViewState>,
    latest_requested: u64,
    latest_applied: u64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &Arc<ViewState> {
        &self.state
    }

    /// Applies `f` to a copy of the state. Returns the new state only when its
    /// content changed; unchanged updates are not published.
    pub fn update(&mut self, f: impl FnOnce(&mut ViewState)) -> Option<Arc<ViewState>> {
        let mut next = (*self.state).clone();
        f(&mut next);
        if next.same_content(&self.state) && next.refresh_seq == self.state.refresh_seq {
            return None;
        }
        next.version = self.state.version + 1;
        self.state = Arc::new(next);
        Some(Arc::clone(&self.state))
    }

    /// Allocates the next refresh sequence and marks the state as loading.
    pub fn begin_refresh(&mut self) -> (u64, Option<Arc<ViewState>>) {
        self.latest_requested += 1;
        let seq = self.latest_requested;
        (seq, self.update(|s| s.loading = true))
    }

    /// Applies a finished run. `follow_up` tells whether another run is queued
    /// behind it: data is still published with `loading = false`, but a result
    /// discarded for a stale selection keeps the view loading.
    pub fn complete_refresh(
        &mut self,
        seq: u64,
        outcome: Result<PipelineOutput, SourceError>,
        follow_up: bool,
    ) -> Option<Arc<ViewState>> {
        if seq <= self.latest_applied {
            debug!(seq, applied = self.latest_applied, "discarding stale refresh");
            return None;
        }
        self.latest_applied = seq;
        let still_loading = seq < self.latest_requested;

        match outcome {
            Ok(output) if output.requested_filter.as_deref() == self.state.selected_filter_id() => {
                let PipelineOutput {
                    filter, selection, ..
                } = output;
                self.update(|s| {
                    s.loading = still_loading;
                    s.refresh_seq = seq;
                    if filter.is_some() {
                        s.selected_filter = filter;
                    }
                    s.running = selection.foreground;
                    s.running_background = selection.background;
                    s.not_running = selection.not_running;
                })
            }
            Ok(_) => {
                // Selection changed while this run was in flight; a newer
                // refresh for the new selection is already queued.
                debug!(seq, "discarding refresh for a previous selection");
                self.update(|s| s.loading = still_loading || follow_up)
            }
            Err(err) => {
                error!(seq, error = %err, "refresh failed, keeping previous data");
                self.update(|s| s.loading = still_loading)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewModelOptions {
    pub default_filter: String,
    pub service_limit: usize,
    pub settle: SettleConfig,
}

impl ViewModelOptions {
    pub fn from_config(config: &Config) -> Self {
        ViewModelOptions {
            default_filter: config.general.default_filter.clone(),
            service_limit: config.general.service_limit,
            settle: config.settle.clone(),
        }
    }
}

enum Internal {
    FiltersLoaded(Result<Vec<AppSetFilter>, SourceError>),
    Loaded {
        seq: u64,
        outcome: Result<PipelineOutput, SourceError>,
    },
    Settled,
}

/// Handle to the task owning the view state. Dropping it stops the task;
/// pipeline runs still in flight are discarded.
pub struct ProcessViewModel {
    commands: mpsc::UnboundedSender<Command>,
    _task: JoinHandle<()>,
}

impl ProcessViewModel {
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        source: Arc<dyn SnapshotSource>,
        collation: Arc<dyn Collation>,
        options: ViewModelOptions,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            store: Store::new(),
            in_flight: None,
            pending: false,
            source,
            collation,
            options,
            subscribers: Vec::new(),
            internal_tx,
        };
        let task = tokio::spawn(worker.run(rx, internal_rx));
        Self {
            commands,
            _task: task,
        }
    }

    /// Loads the app sets, selects the default one and refreshes.
    pub fn initialize(&self) {
        self.send(Command::Initialize);
    }

    pub fn refresh(&self) {
        self.send(Command::Refresh);
    }

    pub fn select_filter(&self, filter: AppSetFilter) {
        self.send(Command::SelectFilter(filter));
    }

    /// Asks the source to trim background work, waits for it to settle, then refreshes.
    pub fn clear_background_tasks(&self) {
        self.send(Command::ClearBackgroundTasks);
    }

    /// Receives the current state first, then every update in publication order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Arc<ViewState>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Command::Subscribe(tx));
        rx
    }

    pub async fn current(&self) -> Option<Arc<ViewState>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Current(tx));
        rx.await.ok()
    }

    fn send(&self, command: Command) {
        let name = command.name();
        if self.commands.send(command).is_err() {
            warn!(command = name, "view model task is gone, dropping command");
        }
    }
}

struct Worker {
    store: Store,
    /// Sequence of the pipeline run currently executing.
    in_flight: Option<u64>,
    /// A refresh was requested while a run was in flight.
    pending: bool,
    source: Arc<dyn SnapshotSource>,
    collation: Arc<dyn Collation>,
    options: ViewModelOptions,
    subscribers: Vec<mpsc::UnboundedSender<Arc<ViewState>>>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = internal.recv() => self.handle_internal(event),
            }
        }
        debug!("view model task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        debug!(command = command.name(), "handling command");
        match command {
            Command::Initialize => {
                let source = Arc::clone(&self.source);
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let filters = tokio::task::spawn_blocking(move || source.list_app_set_filters())
                        .await
                        .unwrap_or_else(|err| Err(SourceError::Unavailable(err.to_string())));
                    let _ = tx.send(Internal::FiltersLoaded(filters));
                });
            }
            Command::Refresh => self.start_refresh(),
            Command::SelectFilter(filter) => {
                let emitted = self.store.update(|s| {
                    s.selected_filter = Some(filter);
                    s.loading = true;
                });
                self.publish(emitted);
                self.start_refresh();
            }
            Command::ClearBackgroundTasks => {
                let emitted = self.store.update(|s| s.loading = true);
                self.publish(emitted);
                let source = Arc::clone(&self.source);
                let settle = self.options.settle.clone();
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let command_source = Arc::clone(&source);
                    let sent = tokio::task::spawn_blocking(move || {
                        command_source.send_clear_background_tasks()
                    })
                    .await;
                    match sent {
                        Ok(Ok(())) => info!("clear background tasks command sent"),
                        Ok(Err(err)) => warn!(error = %err, "clear background tasks command failed"),
                        Err(err) => warn!(error = %err, "clear background tasks command panicked"),
                    }
                    wait_for_settle(source, &settle).await;
                    let _ = tx.send(Internal::Settled);
                });
            }
            Command::Subscribe(tx) => {
                if tx.send(Arc::clone(self.store.state())).is_ok() {
                    self.subscribers.push(tx);
                }
            }
            Command::Current(tx) => {
                let _ = tx.send(Arc::clone(self.store.state()));
            }
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::FiltersLoaded(result) => {
                let filters = result.unwrap_or_else(|err| {
                    warn!(error = %err, "could not load app sets");
                    Vec::new()
                });
                let default_id = self.options.default_filter.clone();
                let emitted = self.store.update(|s| {
                    if s.selected_filter.is_none() {
                        s.selected_filter = filters.iter().find(|f| f.id == default_id).cloned();
                    }
                    s.filter_options = filters;
                    s.loading = true;
                });
                self.publish(emitted);
                self.start_refresh();
            }
            Internal::Loaded { seq, outcome } => {
                if self.in_flight == Some(seq) {
                    self.in_flight = None;
                }
                let follow_up = self.pending;
                let emitted = self.store.complete_refresh(seq, outcome, follow_up);
                self.publish(emitted);
                if follow_up {
                    self.pending = false;
                    self.start_refresh();
                }
            }
            Internal::Settled => self.start_refresh(),
        }
    }

    fn start_refresh(&mut self) {
        if let Some(running) = self.in_flight {
            debug!(running, "refresh already in flight, queueing one follow-up");
            self.pending = true;
            let emitted = self.store.update(|s| s.loading = true);
            self.publish(emitted);
            return;
        }
        let (seq, emitted) = self.store.begin_refresh();
        self.publish(emitted);
        self.in_flight = Some(seq);

        let source = Arc::clone(&self.source);
        let collation = Arc::clone(&self.collation);
        let filter = self.store.state().selected_filter.clone();
        let limit = self.options.service_limit;
        let tx = self.internal_tx.clone();
        debug!(seq, filter = ?filter.as_ref().map(|f| &f.id), "starting refresh");
        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || {
                run_pipeline(source.as_ref(), filter.as_ref(), collation.as_ref(), limit)
            })
            .await
            .unwrap_or_else(|err| Err(SourceError::Unavailable(format!("pipeline task failed: {err}"))));
            let _ = tx.send(Internal::Loaded { seq, outcome });
        });
    }

    fn publish(&mut self, state: Option<Arc<ViewState>>) {
        let Some(state) = state else {
            return;
        };
        self.subscribers
            .retain(|tx| tx.send(Arc::clone(&state)).is_ok());
    }
}

/// Polls the cached process set until two consecutive polls agree, or the
/// configured maximum delay passes.
async fn wait_for_settle(source: Arc<dyn SnapshotSource>, settle: &SettleConfig) {
    let deadline = Instant::now() + settle.max_delay();
    let mut previous: Option<Vec<u32>> = None;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining == Duration::ZERO {
            debug!("settle delay elapsed");
            return;
        }
        tokio::time::sleep(settle.poll_interval().min(remaining)).await;

        let poll_source = Arc::clone(&source);
        let cached = tokio::task::spawn_blocking(move || cached_pids(poll_source.as_ref()))
            .await
            .ok()
            .and_then(Result::ok);
        match cached {
            Some(pids) if previous.as_ref() == Some(&pids) => {
                debug!(remaining = pids.len(), "background processes settled");
                return;
            }
            other => previous = other,
        }
    }
}

fn cached_pids(source: &dyn SnapshotSource) -> Result<Vec<u32>, SourceError> {
    let mut pids: Vec<u32> = source
        .list_running_processes()?
        .into_iter()
        .filter(|p| p.importance.is_cached())
        .map(|p| p.pid)
        .collect();
    pids.sort_unstable();
    Ok(pids)
}
