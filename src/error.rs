//! # Stage: Error Taxonomy
//!
//! ## Responsibility
//! Every error the crate can surface, split by where it is handled:
//! - [`ConfigError`] is fatal and returned synchronously from construction.
//! - [`RecipeError`] is raised by recipe behaviour and never escapes the
//!   execution boundary; [`ExecutionError`] is what that boundary records.
//! - [`LoadError`] covers reading a compiled bundle from disk.
//!
//! Malformed persisted tokens are deliberately absent: they decode to
//! "never decided" instead of failing.

use thiserror::Error;

/// A wave definition that cannot be turned into a runnable engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("an id for this wave must be specified")]
    MissingId,
    #[error("a name for wave '{id}' must be specified")]
    MissingName { id: String },
    #[error("wave '{id}' must specify at least 2 recipes, found {found}")]
    TooFewRecipes { id: String, found: usize },
    #[error("wave '{id}' declares recipe id '{recipe}' more than once")]
    DuplicateRecipe { id: String, recipe: String },
    #[error("wave '{id}' has an empty recipe id")]
    EmptyRecipeId { id: String },
    #[error("wave '{id}' must specify a trigger function")]
    MissingTrigger { id: String },
    #[error("wave '{id}' sample rate must be within [0, 1], got {rate}")]
    SampleRateOutOfRange { id: String, rate: f64 },
    #[error("wave '{id}' recipe '{recipe}' sample rate must be within [0, 1], got {rate}")]
    RecipeRateOutOfRange { id: String, recipe: String, rate: f64 },
    #[error("wave '{id}': recipe '{recipe}' has no sample rate but others do; set it on every recipe or none")]
    PartialRecipeRates { id: String, recipe: String },
    #[error("wave '{id}': recipe sample rates must sum to 1, got {sum}")]
    RecipeRatesSum { id: String, sum: f64 },
    #[error("wave '{id}' is inactive and cannot be constructed")]
    Inactive { id: String },
    #[error("a wave with id '{id}' is already registered")]
    DuplicateId { id: String },
}

/// Failure raised from inside a recipe's behaviour callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RecipeError {
    pub message: String,
}

impl RecipeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl From<&str> for RecipeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for RecipeError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Outcome of the recipe failure boundary when the recipe did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Behaviour returned an error.
    #[error("recipe '{recipe}' failed: {source}")]
    Failed {
        recipe: String,
        #[source]
        source: RecipeError,
    },
    /// Behaviour panicked; the payload message is captured when it is a string.
    #[error("recipe '{recipe}' panicked: {message}")]
    Panicked { recipe: String, message: String },
}

impl ExecutionError {
    /// Text forwarded to telemetry, before truncation.
    pub fn report_text(&self) -> String {
        match self {
            ExecutionError::Failed { source, .. } => source.message.clone(),
            ExecutionError::Panicked { message, .. } => message.clone(),
        }
    }
}

/// Errors while reading a compiled bundle.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read bundle {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML bundle: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON bundle: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported bundle extension '{0}' (expected .toml or .json)")]
    UnsupportedFormat(String),
    #[error("duplicated wave id '{0}' in bundle")]
    DuplicateWave(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
