//! # Stage: Decision Store
//!
//! ## Responsibility
//! Persist a visitor's sticky assignment for one wave in a small key/value
//! slot (a cookie, on the web). The value is a [`StoredDecision`] encoded as
//!
//! ```text
//! token     = flag [ "." recipe-id ]
//! flag      = "0" | "1"
//! recipe-id = 1*char            ; everything after the first "."
//! ```
//!
//! ## Guarantees
//! - Read lazily once per [`DecisionStore`]; later reads hit the cached copy
//! - Writes identical to the cached value are skipped
//! - Malformed tokens decode to "never decided", never an error
//! - Key namespacing: `<prefix>_<waveId>` plus `-staging` for staging waves
//!
//! ## NOT Responsible For
//! - Cookie transport (that is the host's [`CookieJar`])

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::trace;

use crate::{definition::WaveState, options::EffectiveOptions};

// ---------------------------------------------------------------------------
// CookieJar
// ---------------------------------------------------------------------------

/// Everything but `A-Z a-z 0-9 - _ . ! ~ * ' ( )` is escaped.
const COOKIE_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, COOKIE_COMPONENT).to_string()
}

/// Inverse of [`encode_component`]; invalid UTF-8 is replaced, never an error.
pub fn decode_component(encoded: &str) -> String {
    percent_decode_str(encoded).decode_utf8_lossy().into_owned()
}

/// Split a `Cookie:` header (`a=1; b=2`) into decoded pairs. Later names win.
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .map(str::trim)
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (decode_component(name.trim()), decode_component(value.trim())))
        .collect()
}

/// Attributes attached to every sticky-decision write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieAttributes {
    pub max_age_days: u32,
    pub domain: Option<String>,
    pub path: String,
}

impl CookieAttributes {
    pub fn new(max_age_days: u32, domain: Option<String>) -> Self {
        Self { max_age_days, domain, path: "/".into() }
    }

    /// Render a `Set-Cookie` header value. Name and value are
    /// percent-encoded; domains get a leading `.` so the cookie is shared
    /// with subdomains.
    pub fn to_set_cookie(&self, name: &str, value: &str) -> String {
        let mut out = format!(
            "{}={}; Max-Age={}; Path={}",
            encode_component(name),
            encode_component(value),
            u64::from(self.max_age_days) * 24 * 60 * 60,
            self.path
        );
        if let Some(domain) = self.domain.as_deref().filter(|d| !d.is_empty()) {
            if domain.starts_with('.') {
                out.push_str(&format!("; Domain={domain}"));
            } else {
                out.push_str(&format!("; Domain=.{domain}"));
            }
        }
        out
    }
}

/// The host's persistent key/value slot. Names and values are raw; HTTP
/// hosts escape them with [`CookieAttributes::to_set_cookie`] and
/// [`parse_cookie_header`].
pub trait CookieJar: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str, attributes: &CookieAttributes);
}

/// In-process jar. Clones share the same storage, so a second engine built
/// on a clone sees what the first one persisted ("the next page view").
#[derive(Debug, Clone, Default)]
pub struct MemoryJar {
    inner: Arc<Mutex<HashMap<String, (String, CookieAttributes)>>>,
    writes: Arc<Mutex<usize>>,
}

impl MemoryJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a cookie, as if set on an earlier visit.
    pub fn with(self, name: &str, value: &str) -> Self {
        self.set(name, value, &CookieAttributes::new(0, None));
        if let Ok(mut n) = self.writes.lock() {
            *n = 0;
        }
        self
    }

    /// Number of `set` calls since creation (seeding excluded).
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|n| *n).unwrap_or(0)
    }

    pub fn attributes(&self, name: &str) -> Option<CookieAttributes> {
        self.inner.lock().ok()?.get(name).map(|(_, a)| a.clone())
    }

    pub fn clear(&self) {
        if let Ok(mut m) = self.inner.lock() {
            m.clear();
        }
    }
}

impl CookieJar for MemoryJar {
    fn get(&self, name: &str) -> Option<String> {
        self.inner.lock().ok()?.get(name).map(|(v, _)| v.clone())
    }

    fn set(&self, name: &str, value: &str, attributes: &CookieAttributes) {
        if let Ok(mut m) = self.inner.lock() {
            m.insert(name.to_string(), (value.to_string(), attributes.clone()));
        }
        if let Ok(mut n) = self.writes.lock() {
            *n += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// StoredDecision
// ---------------------------------------------------------------------------

/// A visitor's persisted assignment for one wave.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredDecision {
    /// `None` means the visitor was never decided.
    pub in_test: Option<bool>,
    pub recipe: Option<String>,
}

impl StoredDecision {
    pub fn undecided() -> Self {
        Self::default()
    }

    pub fn decided(in_test: bool, recipe: Option<&str>) -> Self {
        Self { in_test: Some(in_test), recipe: recipe.map(str::to_owned) }
    }

    /// Decode a token; anything malformed is "never decided".
    pub fn decode(token: &str) -> Self {
        let (flag, recipe) = match token.split_once('.') {
            Some((flag, recipe)) => (flag, Some(recipe)),
            None => (token, None),
        };
        let in_test = match flag.trim() {
            "1" => true,
            "0" => false,
            _ => return Self::undecided(),
        };
        Self {
            in_test: Some(in_test),
            recipe: recipe.filter(|r| !r.is_empty()).map(str::to_owned),
        }
    }

    /// Encode; `None` for an undecided value (nothing to persist).
    pub fn encode(&self) -> Option<String> {
        let flag = if self.in_test? { "1" } else { "0" };
        Some(match &self.recipe {
            Some(recipe) => format!("{flag}.{recipe}"),
            None => flag.to_string(),
        })
    }

    /// The recipe a returning visitor should see: only when in the test.
    pub fn active_recipe(&self) -> Option<&str> {
        match self.in_test {
            Some(true) => self.recipe.as_deref(),
            _ => None,
        }
    }
}

impl FromStr for StoredDecision {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::decode(s))
    }
}

impl fmt::Display for StoredDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Some(token) => f.write_str(&token),
            None => f.write_str("<undecided>"),
        }
    }
}

// ---------------------------------------------------------------------------
// DecisionStore
// ---------------------------------------------------------------------------

/// Per-wave view of the persisted decision, cached for one page view.
pub struct DecisionStore {
    jar: Arc<dyn CookieJar>,
    key: String,
    attributes: CookieAttributes,
    cached: Option<StoredDecision>,
}

impl DecisionStore {
    pub fn new(jar: Arc<dyn CookieJar>, wave_id: &str, state: WaveState, options: &EffectiveOptions) -> Self {
        Self {
            jar,
            key: Self::key_for(&options.cookie_prefix, wave_id, state),
            attributes: CookieAttributes::new(options.cookie_duration_days, options.cookie_domain.clone()),
            cached: None,
        }
    }

    pub fn key_for(prefix: &str, wave_id: &str, state: WaveState) -> String {
        match state {
            WaveState::Staging => format!("{prefix}_{wave_id}-staging"),
            _ => format!("{prefix}_{wave_id}"),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn attributes(&self) -> &CookieAttributes {
        &self.attributes
    }

    /// Current decision; hits the jar only the first time.
    pub fn read(&mut self) -> StoredDecision {
        if let Some(cached) = &self.cached {
            return cached.clone();
        }
        let decision = self
            .jar
            .get(&self.key)
            .map(|token| StoredDecision::decode(&token))
            .unwrap_or_default();
        self.cached = Some(decision.clone());
        decision
    }

    /// Persist a decision. `recipe = None` keeps whatever recipe is stored.
    /// Returns `true` when the jar was written.
    pub fn write(&mut self, in_test: bool, recipe: Option<&str>) -> bool {
        let current = self.read();
        let next = StoredDecision {
            in_test: Some(in_test),
            recipe: recipe.map(str::to_owned).or(current.recipe.clone()),
        };
        if next == current {
            return false;
        }
        let Some(token) = next.encode() else { return false };
        trace!(target: "wave_bucket::store", key = %self.key, token = %token, "persisting decision");
        self.jar.set(&self.key, &token, &self.attributes);
        self.cached = Some(next);
        true
    }

    pub fn set_in_test(&mut self, in_test: bool) -> bool {
        self.write(in_test, None)
    }

    /// Store the recipe while keeping the current flag (a fresh slot becomes
    /// `in_test = true`).
    pub fn set_recipe(&mut self, recipe: &str) -> bool {
        let in_test = self.read().in_test.unwrap_or(true);
        self.write(in_test, Some(recipe))
    }
}

impl fmt::Debug for DecisionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionStore")
            .field("key", &self.key)
            .field("cached", &self.cached)
            .finish()
    }
}
