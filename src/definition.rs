//! # Stage: Wave Definitions
//!
//! ## Responsibility
//! The raw, not-yet-validated shape of a wave as produced by the build step:
//! [`WaveSpec`] with its ordered [`RecipeSpec`] list. Data fields deserialize
//! from TOML/JSON; callbacks ([`Trigger`], [`Behavior`]) are bound by the host
//! afterwards because they cannot be serialized.
//!
//! ## Guarantees
//! - Recipe declaration order from the source document is preserved
//! - Hooks are cheap to clone (`Arc`) and `Send + Sync`
//!
//! ## NOT Responsible For
//! - Checking anything (see [`crate::validate`])

use std::{fmt, sync::Arc};

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::{engine::ActivationEngine, error::RecipeError, options::OptionOverrides};

// ---------------------------------------------------------------------------
// WaveState
// ---------------------------------------------------------------------------

/// Deployment state of a wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveState {
    /// Nobody is sampled in; only preview links enter visitors. Uses a
    /// separate `-staging` cookie so going live starts from a clean slate.
    #[default]
    Staging,
    /// Visitors are sampled in according to the sample rate.
    Live,
    /// Not constructed at all.
    Inactive,
}

impl fmt::Display for WaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaveState::Staging  => write!(f, "staging"),
            WaveState::Live     => write!(f, "live"),
            WaveState::Inactive => write!(f, "inactive"),
        }
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

type BehaviorFn = dyn Fn(&ActivationEngine) -> Result<(), RecipeError> + Send + Sync;
type TriggerFn = dyn Fn(&mut ActivationEngine) + Send + Sync;

/// A recipe's behavioural callback. Receives the engine that chose it.
#[derive(Clone)]
pub struct Behavior(Arc<BehaviorFn>);

impl Behavior {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ActivationEngine) -> Result<(), RecipeError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn call(&self, engine: &ActivationEngine) -> Result<(), RecipeError> {
        (self.0)(engine)
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Behavior(..)")
    }
}

/// Decides when to call [`ActivationEngine::activate`]. Invoked once, right
/// after the engine is registered.
#[derive(Clone)]
pub struct Trigger(Arc<TriggerFn>);

impl Trigger {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut ActivationEngine) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Trigger that activates immediately.
    pub fn immediate() -> Self {
        Self::new(|engine| {
            engine.activate();
        })
    }

    /// Trigger that leaves activation to the host (e.g. after a DOM wait).
    pub fn deferred() -> Self {
        Self::new(|_| {})
    }

    pub(crate) fn fire(&self, engine: &mut ActivationEngine) {
        (self.0)(engine)
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Trigger(..)")
    }
}

// ---------------------------------------------------------------------------
// RecipeSpec / WaveSpec
// ---------------------------------------------------------------------------

/// One variant as declared in the bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeSpec {
    #[serde(default)]
    pub name: Option<String>,
    /// Share of admitted traffic; all-or-none across a wave.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
    /// Presentation payload, injected after the wave-level css.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(skip)]
    pub behavior: Option<Behavior>,
}

impl RecipeSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Default::default() }
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    pub fn css(mut self, css: impl Into<String>) -> Self {
        self.css = Some(css.into());
        self
    }

    pub fn behavior<F>(mut self, f: F) -> Self
    where
        F: Fn(&ActivationEngine) -> Result<(), RecipeError> + Send + Sync + 'static,
    {
        self.behavior = Some(Behavior::new(f));
        self
    }
}

/// Deadline configuration: how long the host waits for execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unveil {
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_recipe: Option<String>,
}

fn default_sample_rate() -> f64 {
    1.0
}

/// A wave exactly as compiled, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveSpec {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: WaveState,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default, with = "ordered_recipes")]
    pub recipes: Vec<(String, RecipeSpec)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divert_to: Option<String>,
    #[serde(default)]
    pub manual_exposure: bool,
    /// Wave-level presentation payload, injected before any recipe css.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unveil: Option<Unveil>,
    #[serde(default)]
    pub options: OptionOverrides,
    #[serde(skip)]
    pub trigger: Option<Trigger>,
}

impl Default for WaveSpec {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            state: WaveState::Staging,
            sample_rate: default_sample_rate(),
            recipes: Vec::new(),
            divert_to: None,
            manual_exposure: false,
            css: None,
            unveil: None,
            options: OptionOverrides::default(),
            trigger: None,
        }
    }
}

impl WaveSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: Some(id.into()), name: Some(name.into()), ..Default::default() }
    }

    pub fn state(mut self, state: WaveState) -> Self {
        self.state = state;
        self
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn recipe(mut self, id: impl Into<String>, recipe: RecipeSpec) -> Self {
        self.recipes.push((id.into(), recipe));
        self
    }

    pub fn divert_to(mut self, recipe_id: impl Into<String>) -> Self {
        self.divert_to = Some(recipe_id.into());
        self
    }

    pub fn manual_exposure(mut self, manual: bool) -> Self {
        self.manual_exposure = manual;
        self
    }

    pub fn css(mut self, css: impl Into<String>) -> Self {
        self.css = Some(css.into());
        self
    }

    pub fn unveil(mut self, timeout_ms: u64, fallback_recipe: Option<&str>) -> Self {
        self.unveil = Some(Unveil { timeout_ms, fallback_recipe: fallback_recipe.map(str::to_owned) });
        self
    }

    pub fn options(mut self, options: OptionOverrides) -> Self {
        self.options = options;
        self
    }

    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_trigger<F>(self, f: F) -> Self
    where
        F: Fn(&mut ActivationEngine) + Send + Sync + 'static,
    {
        self.trigger(Trigger::new(f))
    }

    /// Attach behaviour to an already-declared recipe. Returns `false` when
    /// no recipe with that id exists.
    pub fn bind_behavior<F>(&mut self, recipe_id: &str, f: F) -> bool
    where
        F: Fn(&ActivationEngine) -> Result<(), RecipeError> + Send + Sync + 'static,
    {
        match self.recipes.iter_mut().find(|(id, _)| id == recipe_id) {
            Some((_, recipe)) => {
                recipe.behavior = Some(Behavior::new(f));
                true
            }
            None => false,
        }
    }

    /// The wave id, or `""` when missing.
    pub fn id_or_empty(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Ordered recipe map (de)serialization
// ---------------------------------------------------------------------------

mod ordered_recipes {
    use super::*;

    pub fn serialize<S: Serializer>(recipes: &[(String, RecipeSpec)], s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(recipes.len()))?;
        for (id, recipe) in recipes {
            map.serialize_entry(id, recipe)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<(String, RecipeSpec)>, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = Vec<(String, RecipeSpec)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of recipe id to recipe")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((id, recipe)) = access.next_entry::<String, RecipeSpec>()? {
                    out.push((id, recipe));
                }
                Ok(out)
            }
        }

        d.deserialize_map(OrderedVisitor)
    }
}
