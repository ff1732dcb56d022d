//! # Stage: Config Validator
//!
//! ## Responsibility
//! Turn a raw [`WaveSpec`] into an immutable [`TestDefinition`], or fail with
//! the first [`ConfigError`] found. Checks run in a fixed order: id, name,
//! recipe count (and recipe ids), trigger, wave sample rate, recipe sample
//! rates.
//!
//! ## Guarantees
//! - All-or-nothing: no partially valid definition is ever returned
//! - No I/O: persisted state is never touched here
//! - A returned definition has ≥ 2 recipes with unique, non-empty ids and
//!   either no recipe rates or a full set summing to 1 (±[`RATE_SUM_TOLERANCE`])

use tracing::warn;

use crate::{
    definition::{Behavior, Trigger, Unveil, WaveSpec, WaveState},
    error::ConfigError,
    options::OptionOverrides,
};

/// Allowed deviation of the recipe sample-rate sum from 1.
pub const RATE_SUM_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Recipe / RecipeSet
// ---------------------------------------------------------------------------

/// A validated recipe.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub sample_rate: Option<f64>,
    pub css: Option<String>,
    pub behavior: Option<Behavior>,
}

/// Recipes in declaration order. Never fewer than two.
#[derive(Debug, Clone)]
pub struct RecipeSet {
    recipes: Vec<Recipe>,
    weighted: bool,
}

impl RecipeSet {
    pub fn get(&self, id: &str) -> Option<&Recipe> {
        self.recipes.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// `true` when every recipe declares a sample rate.
    pub fn is_weighted(&self) -> bool {
        self.weighted
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.recipes.iter().map(|r| r.id.as_str())
    }

    pub fn as_slice(&self) -> &[Recipe] {
        &self.recipes
    }
}

// ---------------------------------------------------------------------------
// TestDefinition
// ---------------------------------------------------------------------------

/// A validated wave. Immutable once built.
#[derive(Debug, Clone)]
pub struct TestDefinition {
    id: String,
    name: String,
    state: WaveState,
    sample_rate: f64,
    recipes: RecipeSet,
    divert_to: Option<String>,
    manual_exposure: bool,
    css: Option<String>,
    unveil: Option<Unveil>,
    overrides: OptionOverrides,
    trigger: Trigger,
}

impl TestDefinition {
    pub fn id(&self) -> &str { &self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn state(&self) -> WaveState { self.state }
    pub fn sample_rate(&self) -> f64 { self.sample_rate }
    pub fn recipes(&self) -> &RecipeSet { &self.recipes }
    pub fn manual_exposure(&self) -> bool { self.manual_exposure }
    pub fn css(&self) -> Option<&str> { self.css.as_deref() }
    pub fn unveil(&self) -> Option<&Unveil> { self.unveil.as_ref() }
    pub fn overrides(&self) -> &OptionOverrides { &self.overrides }
    pub fn trigger(&self) -> &Trigger { &self.trigger }

    /// Declared divert target, whether or not it names a real recipe.
    pub fn divert_to(&self) -> Option<&str> {
        self.divert_to.as_deref()
    }

    /// The divert target recipe, only when the wave is live and the target exists.
    pub fn active_divert(&self) -> Option<&Recipe> {
        if self.state != WaveState::Live {
            return None;
        }
        self.divert_to.as_deref().and_then(|id| self.recipes.get(id))
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

/// Validate a raw wave.
pub fn validate(spec: WaveSpec) -> Result<TestDefinition, ConfigError> {
    let id = match spec.id {
        Some(id) if !id.trim().is_empty() => id,
        _ => return Err(ConfigError::MissingId),
    };
    let name = match spec.name {
        Some(name) if !name.trim().is_empty() => name,
        _ => return Err(ConfigError::MissingName { id }),
    };
    if spec.state == WaveState::Inactive {
        return Err(ConfigError::Inactive { id });
    }
    if spec.recipes.len() < 2 {
        return Err(ConfigError::TooFewRecipes { id, found: spec.recipes.len() });
    }
    for (i, (recipe_id, _)) in spec.recipes.iter().enumerate() {
        if recipe_id.is_empty() {
            return Err(ConfigError::EmptyRecipeId { id });
        }
        if spec.recipes[..i].iter().any(|(other, _)| other == recipe_id) {
            return Err(ConfigError::DuplicateRecipe { id, recipe: recipe_id.clone() });
        }
    }
    let trigger = match spec.trigger {
        Some(t) => t,
        None => return Err(ConfigError::MissingTrigger { id }),
    };
    if !(0.0..=1.0).contains(&spec.sample_rate) {
        return Err(ConfigError::SampleRateOutOfRange { id, rate: spec.sample_rate });
    }

    let weighted = spec.recipes.iter().any(|(_, r)| r.sample_rate.is_some());
    if weighted {
        let mut sum = 0.0;
        for (recipe_id, recipe) in &spec.recipes {
            let rate = match recipe.sample_rate {
                Some(rate) => rate,
                None => return Err(ConfigError::PartialRecipeRates { id, recipe: recipe_id.clone() }),
            };
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::RecipeRateOutOfRange { id, recipe: recipe_id.clone(), rate });
            }
            sum += rate;
        }
        if (sum - 1.0).abs() > RATE_SUM_TOLERANCE {
            return Err(ConfigError::RecipeRatesSum { id, sum });
        }
    }

    if let Some(target) = spec.divert_to.as_deref() {
        if !spec.recipes.iter().any(|(rid, _)| rid == target) {
            warn!(target: "wave_bucket::validate", wave = %id, divert_to = %target,
                "divert target is not a declared recipe; divert is ignored");
        }
    }

    let recipes = spec
        .recipes
        .into_iter()
        .map(|(recipe_id, r)| Recipe {
            name: r.name.unwrap_or_else(|| recipe_id.clone()),
            id: recipe_id,
            sample_rate: r.sample_rate,
            css: r.css,
            behavior: r.behavior,
        })
        .collect();

    Ok(TestDefinition {
        id,
        name,
        state: spec.state,
        sample_rate: spec.sample_rate,
        recipes: RecipeSet { recipes, weighted },
        divert_to: spec.divert_to,
        manual_exposure: spec.manual_exposure,
        css: spec.css,
        unveil: spec.unveil,
        overrides: spec.options,
        trigger,
    })
}

impl TryFrom<WaveSpec> for TestDefinition {
    type Error = ConfigError;

    fn try_from(spec: WaveSpec) -> Result<Self, Self::Error> {
        validate(spec)
    }
}
