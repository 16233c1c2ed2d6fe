use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::system::kill::TrimSignal;
use crate::system::snapshot::AppSetFilter;

/// Well-known id of the "third-party apps" preset selected by default.
pub const THIRD_PARTY_SET_ID: &str = "prebuilt.set.3rd";
pub const SYSTEM_SET_ID: &str = "prebuilt.set.system";
pub const ALL_SET_ID: &str = "prebuilt.set.all";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub settle: SettleConfig,
    pub collector: CollectorConfig,
    pub clear: ClearConfig,
    pub logging: LoggingConfig,
    /// Display labels keyed by package.
    pub labels: BTreeMap<String, String>,
    pub app_sets: Vec<AppSetFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub refresh_rate_ms: u64,
    pub default_filter: String,
    /// `locale`, `locale:<tag>`, `case_insensitive`, `natural` or `lexical`.
    pub collation: String,
    /// Tailors `collation = "locale"`; empty means the root order.
    pub locale: String,
    pub output: String,
    pub service_limit: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            refresh_rate_ms: 2000,
            default_filter: THIRD_PARTY_SET_ID.to_string(),
            collation: "locale".to_string(),
            locale: String::new(),
            output: "text".to_string(),
            service_limit: i32::MAX as usize,
        }
    }
}

impl GeneralConfig {
    /// Collation name with `locale` folded in, as understood by `rank::collation_for`.
    pub fn collation_name(&self) -> String {
        let locale = self.locale.trim();
        if self.collation.eq_ignore_ascii_case("locale") && !locale.is_empty() {
            format!("locale:{locale}")
        } else {
            self.collation.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    pub max_delay_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        SettleConfig {
            max_delay_ms: 1000,
            poll_interval_ms: 100,
        }
    }
}

impl SettleConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub active_cpu_threshold: f32,
    /// Executables under these prefixes belong to the system set.
    pub system_prefixes: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            active_cpu_threshold: 1.0,
            system_prefixes: ["/usr/", "/bin/", "/sbin/", "/lib/", "/lib64/", "/System/", "C:\\Windows\\"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClearConfig {
    pub enabled: bool,
    pub signal: TrimSignal,
    pub current_user_only: bool,
}

impl Default for ClearConfig {
    fn default() -> Self {
        ClearConfig {
            enabled: false,
            signal: TrimSignal::Term,
            current_user_only: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "warn".to_string(),
            json: false,
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("proclens").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

pub fn load_config_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
        Err(_) => Config::default(),
    }
}
