use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;

use icu_collator::options::CollatorOptions;
use icu_collator::{Collator, CollatorBorrowed};
use icu_locale_core::Locale;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::aggregate::{ResolveError, RunningAppState};
use crate::system::snapshot::{AppMetadata, AppSetFilter};
use crate::system::source::MetadataResolver;

/// Ordering used for human-readable app labels.
pub trait Collation: Send + Sync + fmt::Debug {
    fn compare(&self, a: &str, b: &str) -> Ordering;
    fn name(&self) -> &'static str;
}

/// Plain code point order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lexical;

impl Collation for Lexical {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &'static str {
        "lexical"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CaseInsensitive;

impl Collation for CaseInsensitive {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    }

    fn name(&self) -> &'static str {
        "case_insensitive"
    }
}

/// Case-insensitive, with digit runs compared by numeric value ("app2" < "app10").
#[derive(Debug, Clone, Copy, Default)]
pub struct Natural;

impl Collation for Natural {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        natural_cmp(a, b).then_with(|| a.cmp(b))
    }

    fn name(&self) -> &'static str {
        "natural"
    }
}

fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        let (Some(&ca), Some(&cb)) = (ai.peek(), bi.peek()) else {
            return ai.peek().is_some().cmp(&bi.peek().is_some());
        };
        let ord = if ca.is_ascii_digit() && cb.is_ascii_digit() {
            let na = take_digits(&mut ai);
            let nb = take_digits(&mut bi);
            let (ta, tb) = (na.trim_start_matches('0'), nb.trim_start_matches('0'));
            ta.len().cmp(&tb.len()).then_with(|| ta.cmp(tb))
        } else {
            ai.next();
            bi.next();
            ca.to_lowercase().cmp(cb.to_lowercase())
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}

/// Locale tag of the untailored Unicode collation order.
pub const ROOT_LOCALE: &str = "und";

#[derive(Error, Debug)]
pub enum CollationError {
    #[error("invalid locale tag {tag:?}: {reason}")]
    InvalidLocale { tag: String, reason: String },
    #[error("no collation data for {tag}: {reason}")]
    MissingData { tag: String, reason: String },
}

/// Unicode collation tailored to a locale.
pub struct LocaleCollation {
    locale: Locale,
    collator: CollatorBorrowed<'static>,
}

impl LocaleCollation {
    pub fn new(tag: &str) -> Result<Self, CollationError> {
        let locale: Locale = tag.parse().map_err(|err| CollationError::InvalidLocale {
            tag: tag.to_string(),
            reason: format!("{err}"),
        })?;
        let collator = Collator::try_new(locale.clone().into(), CollatorOptions::default())
            .map_err(|err| CollationError::MissingData {
                tag: tag.to_string(),
                reason: err.to_string(),
            })?;
        Ok(LocaleCollation { locale, collator })
    }

    pub fn root() -> Result<Self, CollationError> {
        Self::new(ROOT_LOCALE)
    }

    pub fn locale(&self) -> &Locale {
        &self.locale
    }
}

impl fmt::Debug for LocaleCollation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocaleCollation")
            .field("locale", &self.locale)
            .finish()
    }
}

impl Collation for LocaleCollation {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        self.collator.compare(a, b).then_with(|| a.cmp(b))
    }

    fn name(&self) -> &'static str {
        "locale"
    }
}

/// Looks up a collation by config name.
///
/// `"locale"` is the root Unicode order; `"locale:<tag>"` or a bare tag such
/// as `"fr"` tailors it. Tags that do not parse fall back to the root order.
pub fn collation_for(name: &str) -> Arc<dyn Collation> {
    let name = name.trim();
    match name.to_lowercase().as_str() {
        "lexical" | "binary" => Arc::new(Lexical),
        "natural" => Arc::new(Natural),
        "case_insensitive" => Arc::new(CaseInsensitive),
        "" | "locale" => locale_or_root(ROOT_LOCALE),
        _ => locale_or_root(name.strip_prefix("locale:").unwrap_or(name)),
    }
}

fn locale_or_root(tag: &str) -> Arc<dyn Collation> {
    match LocaleCollation::new(tag) {
        Ok(collation) => Arc::new(collation),
        Err(err) => {
            warn!(error = %err, "falling back to the root collation");
            match LocaleCollation::root() {
                Ok(root) => Arc::new(root),
                Err(_) => Arc::new(CaseInsensitive),
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Selection {
    pub foreground: Vec<RunningAppState>,
    pub background: Vec<RunningAppState>,
    pub not_running: Vec<AppMetadata>,
    /// In-scope packages that are not running and could not be resolved.
    pub unresolved: Vec<ResolveError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionCounts {
    pub foreground: usize,
    pub background: usize,
    pub not_running: usize,
}

impl Selection {
    pub fn counts(&self) -> SelectionCounts {
        SelectionCounts {
            foreground: self.foreground.len(),
            background: self.background.len(),
            not_running: self.not_running.len(),
        }
    }
}

/// Packages of the filter in order, first occurrence wins.
pub fn scope_packages(filter: &AppSetFilter) -> Vec<&str> {
    let mut seen = HashSet::new();
    filter
        .packages
        .iter()
        .map(String::as_str)
        .filter(|p| seen.insert(*p))
        .collect()
}

/// Scopes running apps to `filter` and ranks them.
///
/// Without a filter nothing is in scope and every list comes back empty.
/// Running apps split on `all_cached` (background) and are ordered by total
/// memory, largest first, keeping input order for ties. In-scope packages with
/// no running app are resolved and ordered by label using `collation`.
pub fn select<R>(
    states: Vec<RunningAppState>,
    filter: Option<&AppSetFilter>,
    resolver: &R,
    collation: &dyn Collation,
) -> Selection
where
    R: MetadataResolver + ?Sized,
{
    let Some(filter) = filter else {
        return Selection::default();
    };
    let _span = tracing::debug_span!("pipeline.select", filter = %filter.id).entered();

    let scope = scope_packages(filter);
    let in_scope: HashSet<&str> = scope.iter().copied().collect();

    let (mut foreground, mut background): (Vec<_>, Vec<_>) = states
        .into_iter()
        .filter(|s| in_scope.contains(s.package()))
        .partition(|s| !s.all_cached);
    foreground.sort_by(|a, b| b.total_memory_bytes.cmp(&a.total_memory_bytes));
    background.sort_by(|a, b| b.total_memory_bytes.cmp(&a.total_memory_bytes));

    let running: HashSet<&str> = foreground
        .iter()
        .chain(background.iter())
        .map(RunningAppState::package)
        .collect();

    let mut not_running = Vec::new();
    let mut unresolved = Vec::new();
    for package in scope.iter().filter(|p| !running.contains(**p)) {
        match resolver.resolve_app_metadata(package) {
            Ok(meta) => not_running.push(meta),
            Err(source) => unresolved.push(ResolveError {
                package: package.to_string(),
                source,
            }),
        }
    }
    not_running.sort_by(|a, b| collation.compare(&a.label, &b.label));

    let selection = Selection {
        foreground,
        background,
        not_running,
        unresolved,
    };
    debug!(counts = ?selection.counts(), unresolved = selection.unresolved.len(), "selected apps");
    selection
}
