//! # Stage: Options
//!
//! ## Responsibility
//! Process-wide defaults ([`GlobalOptions`]) and per-wave overrides
//! ([`OptionOverrides`]), merged exactly once at construction into an
//! immutable [`EffectiveOptions`] snapshot. The engine never falls back to
//! globals at decision time.
//!
//! ## NOT Responsible For
//! - Adapter selection (telemetry/random are injected on the registry)

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Default sticky-cookie lifetime.
pub const DEFAULT_COOKIE_DURATION_DAYS: u32 = 60;
/// Failure text forwarded to telemetry is cut to this many characters.
pub const DEFAULT_MAX_ERROR_LENGTH: usize = 1_000;
pub const DEFAULT_COOKIE_PREFIX: &str = "_wave";
pub const DEFAULT_PREVIEW_PREFIX: &str = "wave";

// ---------------------------------------------------------------------------
// GlobalOptions
// ---------------------------------------------------------------------------

/// Defaults shared by every wave on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalOptions {
    /// Persisted key is `<cookie_prefix>_<waveId>[-staging]`.
    pub cookie_prefix: String,
    /// Preview query parameter is `<preview_prefix>_<waveId>`.
    pub preview_prefix: String,
    pub cookie_duration_days: u32,
    pub cookie_domain: Option<String>,
    pub max_error_length: usize,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            cookie_prefix: DEFAULT_COOKIE_PREFIX.into(),
            preview_prefix: DEFAULT_PREVIEW_PREFIX.into(),
            cookie_duration_days: DEFAULT_COOKIE_DURATION_DAYS,
            cookie_domain: None,
            max_error_length: DEFAULT_MAX_ERROR_LENGTH,
        }
    }
}

// ---------------------------------------------------------------------------
// OptionOverrides
// ---------------------------------------------------------------------------

/// Per-wave overrides. `None` means "inherit the global value".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptionOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_duration_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_error_length: Option<usize>,
}

// ---------------------------------------------------------------------------
// EffectiveOptions
// ---------------------------------------------------------------------------

/// The merged, read-only option set one engine runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveOptions {
    pub cookie_prefix: String,
    pub preview_prefix: String,
    pub cookie_duration_days: u32,
    pub cookie_domain: Option<String>,
    pub max_error_length: usize,
}

impl EffectiveOptions {
    pub fn merge(global: &GlobalOptions, overrides: &OptionOverrides) -> Self {
        Self {
            cookie_prefix: global.cookie_prefix.clone(),
            preview_prefix: global.preview_prefix.clone(),
            cookie_duration_days: overrides.cookie_duration_days.unwrap_or(global.cookie_duration_days),
            cookie_domain: overrides.cookie_domain.clone().or_else(|| global.cookie_domain.clone()),
            max_error_length: overrides.max_error_length.unwrap_or(global.max_error_length),
        }
    }
}

impl Default for EffectiveOptions {
    fn default() -> Self {
        Self::merge(&GlobalOptions::default(), &OptionOverrides::default())
    }
}

// ---------------------------------------------------------------------------
// Exclusion
// ---------------------------------------------------------------------------

/// Page-wide exclusion rule checked before any wave is constructed.
#[derive(Clone, Default)]
pub enum Exclusion {
    #[default]
    Never,
    Always,
    /// Evaluated lazily, at most once; the answer is cached.
    Predicate(Arc<dyn Fn() -> bool + Send + Sync>, Arc<OnceCell<bool>>),
}

impl Exclusion {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Exclusion::Predicate(Arc::new(f), Arc::new(OnceCell::new()))
    }

    /// Exclude everybody when the browser refuses cookies.
    pub fn cookies_disabled(cookies_enabled: bool) -> Self {
        if cookies_enabled { Exclusion::Never } else { Exclusion::Always }
    }

    pub fn is_excluded(&self) -> bool {
        match self {
            Exclusion::Never => false,
            Exclusion::Always => true,
            Exclusion::Predicate(f, cached) => *cached.get_or_init(|| f()),
        }
    }
}

impl std::fmt::Debug for Exclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Exclusion::Never => write!(f, "Never"),
            Exclusion::Always => write!(f, "Always"),
            Exclusion::Predicate(_, cached) => write!(f, "Predicate(cached={:?})", cached.get()),
        }
    }
}
