use std::fmt::Write;

use crate::aggregate::RunningAppState;
use crate::format::fit_column;
use crate::system::snapshot::AppSetFilter;
use crate::view_model::ViewState;

const LABEL_WIDTH: usize = 32;
const PROCESS_WIDTH: usize = 28;
const SIZE_WIDTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str_config(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

pub fn render(state: &ViewState, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Text => Ok(render_text(state)),
        OutputFormat::Json => serde_json::to_string_pretty(state),
    }
}

pub fn render_text(state: &ViewState) -> String {
    let mut out = String::new();
    match &state.selected_filter {
        Some(filter) => {
            let _ = write!(
                out,
                "App set: {} ({}), {} packages",
                display_label(filter),
                filter.id,
                filter.packages.len()
            );
        }
        None => out.push_str("No app set selected"),
    }
    if state.loading {
        out.push_str("  [refreshing]");
    }
    out.push('\n');

    render_running(&mut out, "Running", &state.running);
    render_running(&mut out, "Cached in background", &state.running_background);

    let _ = writeln!(out, "Not running ({})", state.not_running.len());
    for app in &state.not_running {
        let _ = writeln!(out, "  {}", app.label);
    }
    out
}

fn render_running(out: &mut String, title: &str, apps: &[RunningAppState]) {
    let _ = writeln!(out, "{title} ({})", apps.len());
    for app in apps {
        let shared = if app.has_shared_processes() { "  shared" } else { "" };
        let _ = writeln!(
            out,
            "  {} {:>width$}  {} procs  {} services{shared}",
            fit_column(&app.app.label, LABEL_WIDTH),
            app.size,
            app.processes.len(),
            app.service_count(),
            width = SIZE_WIDTH,
        );
        for process in &app.processes {
            let _ = writeln!(
                out,
                "    {} pid {:<7} {:>width$}  [{}]",
                fit_column(&process.process.process_name, PROCESS_WIDTH),
                process.process.pid,
                process.size,
                process.process.importance.label(),
                width = SIZE_WIDTH,
            );
            for service in &process.services {
                match &service.client_label {
                    Some(client) => {
                        let _ = writeln!(out, "      - {} (client: {client})", service.label);
                    }
                    None => {
                        let _ = writeln!(out, "      - {}", service.label);
                    }
                }
            }
        }
    }
}

pub fn render_filters(filters: &[AppSetFilter], selected: Option<&str>) -> String {
    let mut out = String::new();
    for filter in filters {
        let marker = if Some(filter.id.as_str()) == selected { "*" } else { " " };
        let _ = writeln!(
            out,
            "{marker} {} {} {} packages",
            fit_column(&filter.id, LABEL_WIDTH),
            fit_column(display_label(filter), LABEL_WIDTH),
            filter.packages.len()
        );
    }
    out
}

fn display_label(filter: &AppSetFilter) -> &str {
    if filter.label.is_empty() {
        &filter.id
    } else {
        &filter.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{RunningProcessState, RunningService};
    use crate::system::snapshot::{
        AppMetadata, ComponentName, Importance, ProcessSnapshot, ServiceSnapshot,
    };

    fn state() -> ViewState {
        let process = ProcessSnapshot {
            pid: 42,
            process_name: "firefox".into(),
            packages: vec!["firefox".into()],
            importance: Importance::Foreground,
            memory_bytes: 0,
        };
        let service = RunningService {
            service: ServiceSnapshot {
                pid: 42,
                component: ComponentName::new("firefox", "org.mozilla.Sync"),
                client_package: None,
                client_label: 0,
            },
            label: "Sync".into(),
            client_label: Some("Keyboard".into()),
        };
        ViewState {
            loading: false,
            selected_filter: Some(AppSetFilter {
                id: "work".into(),
                label: "Work".into(),
                packages: vec!["firefox".into(), "slack".into()],
            }),
            running: vec![RunningAppState {
                app: AppMetadata::new("firefox", "Firefox"),
                processes: vec![RunningProcessState {
                    process,
                    services: vec![service],
                    shared_packages: Vec::new(),
                    memory_bytes: 1024,
                    size: "1 KB".into(),
                }],
                all_cached: false,
                total_memory_bytes: 1024,
                size: "1 KB".into(),
            }],
            not_running: vec![AppMetadata::new("slack", "Slack")],
            ..ViewState::default()
        }
    }

    #[test]
    fn text_report_lists_every_section() {
        let text = render_text(&state());
        assert!(text.starts_with("App set: Work (work), 2 packages\n"));
        assert!(text.contains("Running (1)\n"));
        assert!(text.contains("Cached in background (0)\n"));
        assert!(text.contains("1 procs  1 services"));
        assert!(text.contains("pid 42"));
        assert!(text.contains("      - Sync (client: Keyboard)\n"));
        assert!(text.ends_with("Not running (1)\n  Slack\n"));
    }

    #[test]
    fn loading_and_missing_filter_are_shown() {
        let text = render_text(&ViewState::default());
        assert!(text.starts_with("No app set selected  [refreshing]\n"));
    }

    #[test]
    fn json_report_round_trips_through_serde_json() {
        let json = render(&state(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["running"][0]["app"]["label"], "Firefox");
        assert_eq!(value["not_running"][0]["package"], "slack");
        assert_eq!(value["loading"], false);
    }

    #[test]
    fn filter_listing_marks_selection() {
        let filters = vec![
            AppSetFilter {
                id: "a".into(),
                label: String::new(),
                packages: vec!["x".into()],
            },
            AppSetFilter {
                id: "b".into(),
                label: "Bee".into(),
                packages: Vec::new(),
            },
        ];
        let text = render_filters(&filters, Some("b"));
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("  a "));
        assert!(lines[0].ends_with("1 packages"));
        assert!(lines[1].starts_with("* b "));
        assert!(lines[1].contains("Bee"));
    }

    #[test]
    fn output_format_parses_config_names() {
        assert_eq!(OutputFormat::from_str_config("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str_config("table"), OutputFormat::Text);
    }
}
