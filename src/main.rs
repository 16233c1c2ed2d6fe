use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use tokio::sync::mpsc;
use tracing::info;

use proclens::config::{self, Config, load_config, load_config_from_path};
use proclens::event::{Event, EventHandler};
use proclens::logging;
use proclens::rank::collation_for;
use proclens::report::{OutputFormat, render, render_filters};
use proclens::system::collector::Collector;
use proclens::system::fixture::FixtureSource;
use proclens::system::source::SnapshotSource;
use proclens::view_model::{ProcessViewModel, ViewModelOptions, ViewState};

#[derive(Parser)]
#[command(
    name = "proclens",
    about = "Running apps, their processes, services and memory, scoped by app set"
)]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replay a recorded JSON snapshot instead of reading the live system
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Refresh rate in milliseconds (watch mode)
    #[arg(long)]
    refresh_rate: Option<u64>,

    /// App set id selected on startup
    #[arg(long)]
    filter: Option<String>,

    /// Label ordering: locale, locale:<tag>, case_insensitive, natural, lexical
    #[arg(long)]
    collation: Option<String>,

    /// Locale tag for the locale collation (e.g. fr, sv, de-CH)
    #[arg(long)]
    locale: Option<String>,

    /// Output format: text, json
    #[arg(long)]
    format: Option<String>,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, Default)]
enum Command {
    /// Print the current view once
    #[default]
    Show,
    /// Keep refreshing and print every update until Ctrl-C
    Watch,
    /// Trim background processes, then print the settled view
    Clear,
    /// List available app sets
    Filters,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = load_config_for_cli(&cli);
    logging::init_tracing(&config.logging)?;

    let source: Arc<dyn SnapshotSource> = match &cli.fixture {
        Some(path) => Arc::new(FixtureSource::from_path(path)?),
        None => Arc::new(Collector::new(&config)),
    };
    let format = OutputFormat::from_str_config(&config.general.output);
    let command = cli.command.unwrap_or_default();

    if let Command::Filters = command {
        let filters = source.list_app_set_filters()?;
        print!(
            "{}",
            render_filters(&filters, Some(config.general.default_filter.as_str()))
        );
        return Ok(());
    }

    let view_model = ProcessViewModel::spawn(
        source,
        collation_for(&config.general.collation_name()),
        ViewModelOptions::from_config(&config),
    );
    let mut updates = view_model.subscribe();
    view_model.initialize();

    match command {
        Command::Show => {
            let state = wait_for_data(&mut updates).await?;
            print_state(&state, format)
        }
        Command::Clear => {
            wait_for_data(&mut updates).await?;
            view_model.clear_background_tasks();
            // Skip the loading update the clear publishes first
            let state = loop {
                let state = next_state(&mut updates).await?;
                if state.loading {
                    break wait_for_data(&mut updates).await?;
                }
            };
            print_state(&state, format)
        }
        Command::Watch => {
            watch(
                &view_model,
                updates,
                Duration::from_millis(config.general.refresh_rate_ms.max(100)),
                format,
            )
            .await
        }
        Command::Filters => Ok(()),
    }
}

async fn watch(
    view_model: &ProcessViewModel,
    updates: mpsc::UnboundedReceiver<Arc<ViewState>>,
    tick_rate: Duration,
    format: OutputFormat,
) -> Result<()> {
    let mut events = EventHandler::new(tick_rate, updates);
    let mut printed = 0u64;
    while let Some(event) = events.next().await {
        match event {
            Event::Tick => view_model.refresh(),
            Event::State(state) => {
                if state.loading {
                    continue;
                }
                if printed > 0 && format == OutputFormat::Text {
                    println!("---");
                }
                print_state(&state, format)?;
                printed += 1;
            }
            Event::Interrupt => {
                info!(updates = printed, "interrupted, exiting");
                break;
            }
        }
    }
    Ok(())
}

async fn next_state(updates: &mut mpsc::UnboundedReceiver<Arc<ViewState>>) -> Result<Arc<ViewState>> {
    updates
        .recv()
        .await
        .ok_or_else(|| eyre!("view model stopped unexpectedly"))
}

async fn wait_for_data(updates: &mut mpsc::UnboundedReceiver<Arc<ViewState>>) -> Result<Arc<ViewState>> {
    loop {
        let state = next_state(updates).await?;
        if !state.loading {
            return Ok(state);
        }
    }
}

fn print_state(state: &ViewState, format: OutputFormat) -> Result<()> {
    let rendered = render(state, format)?;
    if rendered.ends_with('\n') {
        print!("{rendered}");
    } else {
        println!("{rendered}");
    }
    Ok(())
}

fn load_config_for_cli(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };

    if let Some(rate) = cli.refresh_rate {
        config.general.refresh_rate_ms = rate;
    }
    if let Some(ref filter) = cli.filter {
        config.general.default_filter = filter.clone();
    }
    if let Some(ref collation) = cli.collation {
        config.general.collation = collation.clone();
    }
    if let Some(ref locale) = cli.locale {
        config.general.locale = locale.clone();
    }
    if let Some(ref format) = cli.format {
        config.general.output = format.clone();
    }
    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }
    if config.general.default_filter.is_empty() {
        config.general.default_filter = config::THIRD_PARTY_SET_ID.to_string();
    }

    config
}
