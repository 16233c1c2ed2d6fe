use serde::{Deserialize, Serialize};

/// Platform priority class of a running process, ordered from most to least
/// important. Discriminants follow the Android `RunningAppProcessInfo` levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Foreground = 100,
    ForegroundService = 125,
    Visible = 200,
    Perceptible = 230,
    Service = 300,
    TopSleeping = 325,
    CantSaveState = 350,
    Cached = 400,
    Gone = 1000,
}

impl Importance {
    pub fn is_cached(self) -> bool {
        self == Importance::Cached
    }

    pub fn value(self) -> i32 {
        self as i32
    }

    /// Maps a raw importance level onto the nearest known class at or below it.
    pub fn from_value(value: i32) -> Self {
        match value {
            i32::MIN..=100 => Importance::Foreground,
            101..=125 => Importance::ForegroundService,
            126..=200 => Importance::Visible,
            201..=230 => Importance::Perceptible,
            231..=300 => Importance::Service,
            301..=325 => Importance::TopSleeping,
            326..=350 => Importance::CantSaveState,
            351..=400 => Importance::Cached,
            _ => Importance::Gone,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Importance::Foreground => "foreground",
            Importance::ForegroundService => "foreground service",
            Importance::Visible => "visible",
            Importance::Perceptible => "perceptible",
            Importance::Service => "service",
            Importance::TopSleeping => "top sleeping",
            Importance::CantSaveState => "heavy weight",
            Importance::Cached => "cached",
            Importance::Gone => "gone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub process_name: String,
    /// Packages hosted by this process; the first one owns it.
    #[serde(default)]
    pub packages: Vec<String>,
    pub importance: Importance,
    #[serde(default)]
    pub memory_bytes: u64,
}

impl ProcessSnapshot {
    pub fn primary_package(&self) -> Option<&str> {
        self.packages.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentName {
    pub package: String,
    pub class_name: String,
}

impl ComponentName {
    pub fn new(package: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class_name: class_name.into(),
        }
    }

    /// Last dot-separated segment of the class name.
    pub fn short_class_name(&self) -> &str {
        self.class_name
            .rsplit('.')
            .next()
            .unwrap_or(self.class_name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub pid: u32,
    pub component: ComponentName,
    #[serde(default)]
    pub client_package: Option<String>,
    /// Label resource reference inside `client_package`; only positive values
    /// point at a real label.
    #[serde(default)]
    pub client_label: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub package: String,
    pub label: String,
    #[serde(default)]
    pub icon: Option<String>,
}

impl AppMetadata {
    pub fn new(package: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            label: label.into(),
            icon: None,
        }
    }
}

/// Named, ordered collection of packages scoping the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSetFilter {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub packages: Vec<String>,
}
