use color_eyre::eyre::{Result, eyre};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use crate::config::LoggingConfig;

/// Builds the level filter: `RUST_LOG` wins over the configured level.
pub fn env_filter(level: &str) -> EnvFilter {
    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    build_filter(from_env.as_deref(), level)
}

fn build_filter(from_env: Option<&str>, level: &str) -> EnvFilter {
    from_env
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

/// Installs the global subscriber. Logs go to stderr so stdout stays a clean report.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.level))
        .with_writer(std::io::stderr);

    let installed = if config.json {
        builder
            .with_ansi(false)
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .try_init()
    } else {
        builder.with_target(false).try_init()
    };
    installed.map_err(|e| eyre!("failed to set tracing subscriber: {e}"))
}
