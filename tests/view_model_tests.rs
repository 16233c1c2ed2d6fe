use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use proclens::config::{SettleConfig, THIRD_PARTY_SET_ID};
use proclens::rank::CaseInsensitive;
use proclens::system::fixture::{FixtureData, FixtureSource};
use proclens::system::snapshot::{
    AppMetadata, AppSetFilter, ComponentName, Importance, ProcessSnapshot, ServiceSnapshot,
};
use proclens::system::source::{MetadataResolver, Result as SourceResult, SnapshotSource};
use proclens::view_model::{ProcessViewModel, ViewModelOptions, ViewState};
use tokio::sync::mpsc::UnboundedReceiver;

fn process(pid: u32, package: &str, importance: Importance, memory_bytes: u64) -> ProcessSnapshot {
    ProcessSnapshot {
        pid,
        process_name: package.to_string(),
        packages: vec![package.to_string()],
        importance,
        memory_bytes,
    }
}

fn app_set(id: &str, packages: &[&str]) -> AppSetFilter {
    AppSetFilter {
        id: id.to_string(),
        label: id.to_string(),
        packages: packages.iter().map(|p| p.to_string()).collect(),
    }
}

fn device() -> FixtureData {
    FixtureData {
        processes: vec![
            process(1, "a", Importance::Cached, 1000),
            process(2, "a", Importance::Cached, 500),
            process(3, "b", Importance::Foreground, 2000),
        ],
        apps: vec![
            AppMetadata::new("a", "Alpha"),
            AppMetadata::new("b", "Bravo"),
            AppMetadata::new("c", "Charlie"),
        ],
        app_sets: vec![
            app_set(THIRD_PARTY_SET_ID, &["a", "b", "c"]),
            app_set("only.c", &["c"]),
        ],
        ..Default::default()
    }
}

fn options() -> ViewModelOptions {
    ViewModelOptions {
        default_filter: THIRD_PARTY_SET_ID.to_string(),
        service_limit: usize::MAX,
        settle: SettleConfig {
            max_delay_ms: 300,
            poll_interval_ms: 10,
        },
    }
}

fn spawn(source: &Arc<FixtureSource>) -> ProcessViewModel {
    let source: Arc<dyn SnapshotSource> = source.clone();
    ProcessViewModel::spawn(source, Arc::new(CaseInsensitive), options())
}

async fn next(updates: &mut UnboundedReceiver<Arc<ViewState>>) -> Arc<ViewState> {
    tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("timed out waiting for a view update")
        .expect("view model stopped")
}

async fn next_loaded(updates: &mut UnboundedReceiver<Arc<ViewState>>) -> Arc<ViewState> {
    loop {
        let state = next(updates).await;
        if !state.loading {
            return state;
        }
    }
}

fn packages(apps: &[proclens::aggregate::RunningAppState]) -> Vec<&str> {
    apps.iter().map(|a| a.package()).collect()
}

fn labels(apps: &[AppMetadata]) -> Vec<&str> {
    apps.iter().map(|a| a.label.as_str()).collect()
}

/// Subscribes, initializes and returns the first fully loaded state.
async fn started(
    source: &Arc<FixtureSource>,
) -> (ProcessViewModel, UnboundedReceiver<Arc<ViewState>>, Arc<ViewState>) {
    let view_model = spawn(source);
    let mut updates = view_model.subscribe();
    view_model.initialize();
    let loaded = next_loaded(&mut updates).await;
    (view_model, updates, loaded)
}

#[tokio::test]
async fn initialize_publishes_filters_then_data() {
    let source = Arc::new(FixtureSource::new(device()));
    let view_model = spawn(&source);
    let mut updates = view_model.subscribe();
    view_model.initialize();

    let initial = next(&mut updates).await;
    assert!(initial.loading);
    assert!(initial.selected_filter.is_none());

    let filters = next(&mut updates).await;
    assert!(filters.loading);
    assert_eq!(filters.filter_options.len(), 2);
    assert_eq!(filters.selected_filter_id(), Some(THIRD_PARTY_SET_ID));

    let data = next(&mut updates).await;
    assert!(!data.loading);
    assert_eq!(packages(&data.running), vec!["b"]);
    assert_eq!(packages(&data.running_background), vec!["a"]);
    assert_eq!(labels(&data.not_running), vec!["Charlie"]);
    assert_eq!(data.running_background[0].total_memory_bytes, 1500);
    assert!(data.version > filters.version);
}

#[tokio::test]
async fn selecting_a_filter_rescopes_the_view() {
    let source = Arc::new(FixtureSource::new(device()));
    let (view_model, mut updates, _) = started(&source).await;

    view_model.select_filter(app_set("only.c", &["c"]));
    let pending = next(&mut updates).await;
    assert!(pending.loading);
    assert_eq!(pending.selected_filter_id(), Some("only.c"));

    let data = next(&mut updates).await;
    assert!(!data.loading);
    assert!(data.running.is_empty());
    assert!(data.running_background.is_empty());
    assert_eq!(labels(&data.not_running), vec!["Charlie"]);
}

#[tokio::test]
async fn unknown_filter_keeps_its_own_packages() {
    let source = Arc::new(FixtureSource::new(device()));
    let (view_model, mut updates, _) = started(&source).await;

    view_model.select_filter(app_set("custom", &["b", "c"]));
    let data = next_loaded(&mut updates).await;
    assert_eq!(data.selected_filter_id(), Some("custom"));
    assert_eq!(packages(&data.running), vec!["b"]);
    assert_eq!(labels(&data.not_running), vec!["Charlie"]);
}

#[tokio::test]
async fn refresh_without_changes_republishes_identical_content() {
    let source = Arc::new(FixtureSource::new(device()));
    let (view_model, mut updates, before) = started(&source).await;

    view_model.refresh();
    assert!(next(&mut updates).await.loading);
    let after = next(&mut updates).await;
    assert!(!after.loading);
    assert!(after.same_content(&before));
    assert!(after.refresh_seq > before.refresh_seq);
}

#[tokio::test]
async fn refresh_picks_up_system_changes() {
    let source = Arc::new(FixtureSource::new(device()));
    let (view_model, mut updates, _) = started(&source).await;

    let mut changed = device();
    changed
        .processes
        .push(process(4, "c", Importance::Visible, 4096));
    source.replace(changed);
    view_model.refresh();

    let data = next_loaded(&mut updates).await;
    assert_eq!(packages(&data.running), vec!["c", "b"]);
    assert!(data.not_running.is_empty());
}

#[tokio::test]
async fn clearing_background_tasks_settles_then_refreshes() {
    let source = Arc::new(FixtureSource::new(device()));
    let (view_model, mut updates, _) = started(&source).await;

    view_model.clear_background_tasks();
    assert!(next(&mut updates).await.loading);
    let data = next(&mut updates).await;

    assert!(!data.loading);
    assert_eq!(source.clear_requests(), 1);
    assert!(data.running_background.is_empty());
    assert_eq!(packages(&data.running), vec!["b"]);
    assert_eq!(labels(&data.not_running), vec!["Alpha", "Charlie"]);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_data() {
    let source = Arc::new(FixtureSource::new(device()));
    let (view_model, mut updates, before) = started(&source).await;

    source.set_unavailable(true);
    view_model.refresh();
    assert!(next(&mut updates).await.loading);
    let after = next(&mut updates).await;

    assert!(!after.loading);
    assert_eq!(after.running, before.running);
    assert_eq!(after.not_running, before.not_running);
    assert_eq!(after.refresh_seq, before.refresh_seq);
}

#[tokio::test]
async fn late_subscriber_starts_from_current_state() {
    let source = Arc::new(FixtureSource::new(device()));
    let (view_model, _updates, loaded) = started(&source).await;

    let mut late = view_model.subscribe();
    let first = next(&mut late).await;
    assert_eq!(first.version, loaded.version);
    assert!(!first.loading);

    let current = view_model.current().await.unwrap();
    assert_eq!(*current, *loaded);
}

/// Fixture whose process listing takes `delay`, recording how many listings overlap.
struct SlowSource {
    inner: FixtureSource,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    listings: AtomicUsize,
}

impl SlowSource {
    fn new(delay: Duration) -> Self {
        SlowSource {
            inner: FixtureSource::new(device()),
            delay,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            listings: AtomicUsize::new(0),
        }
    }
}

impl MetadataResolver for SlowSource {
    fn resolve_app_metadata(&self, package: &str) -> SourceResult<AppMetadata> {
        self.inner.resolve_app_metadata(package)
    }
}

impl SnapshotSource for SlowSource {
    fn list_running_processes(&self) -> SourceResult<Vec<ProcessSnapshot>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.listings.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.inner.list_running_processes()
    }

    fn list_running_services(&self, limit: usize) -> SourceResult<Vec<ServiceSnapshot>> {
        self.inner.list_running_services(limit)
    }

    fn query_memory_bytes(&self, pids: &[u32]) -> SourceResult<u64> {
        self.inner.query_memory_bytes(pids)
    }

    fn service_label(&self, component: &ComponentName) -> SourceResult<Option<String>> {
        self.inner.service_label(component)
    }

    fn client_label(&self, package: &str, label_ref: i32) -> SourceResult<String> {
        self.inner.client_label(package, label_ref)
    }

    fn list_app_set_filters(&self) -> SourceResult<Vec<AppSetFilter>> {
        self.inner.list_app_set_filters()
    }

    fn send_clear_background_tasks(&self) -> SourceResult<()> {
        self.inner.send_clear_background_tasks()
    }
}

#[tokio::test]
async fn refreshes_faster_than_the_pipeline_still_publish_loaded_data() {
    let source = Arc::new(SlowSource::new(Duration::from_millis(60)));
    let shared: Arc<dyn SnapshotSource> = source.clone();
    let view_model = ProcessViewModel::spawn(shared, Arc::new(CaseInsensitive), options());
    let mut updates = view_model.subscribe();
    view_model.initialize();
    next_loaded(&mut updates).await;

    let mut ticks = tokio::time::interval(Duration::from_millis(20));
    let mut loaded = 0usize;
    for _ in 0..25 {
        ticks.tick().await;
        view_model.refresh();
        while let Ok(state) = updates.try_recv() {
            if !state.loading {
                loaded += 1;
            }
        }
    }

    assert!(loaded >= 2, "only {loaded} loaded states while refreshing every 20ms");
    assert_eq!(source.max_active.load(Ordering::SeqCst), 1);
    // 25 requests over roughly 500ms collapse into far fewer pipeline runs
    assert!(source.listings.load(Ordering::SeqCst) < 20);

    let settled = next_loaded(&mut updates).await;
    assert_eq!(packages(&settled.running), vec!["b"]);
    assert_eq!(labels(&settled.not_running), vec!["Charlie"]);
}

#[tokio::test]
async fn selecting_during_a_slow_refresh_publishes_only_the_new_selection() {
    let source = Arc::new(SlowSource::new(Duration::from_millis(80)));
    let shared: Arc<dyn SnapshotSource> = source.clone();
    let view_model = ProcessViewModel::spawn(shared, Arc::new(CaseInsensitive), options());
    let mut updates = view_model.subscribe();
    view_model.initialize();
    next_loaded(&mut updates).await;

    view_model.refresh();
    tokio::time::sleep(Duration::from_millis(20)).await;
    view_model.select_filter(app_set("only.c", &["c"]));

    let data = next_loaded(&mut updates).await;
    assert_eq!(data.selected_filter_id(), Some("only.c"));
    assert!(data.running.is_empty());
    assert_eq!(labels(&data.not_running), vec!["Charlie"]);
    assert_eq!(source.max_active.load(Ordering::SeqCst), 1);
}
