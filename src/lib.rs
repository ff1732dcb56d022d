//! Sticky, deterministic recipe bucketing for client-side experiments.
//!
//! A compiled [`config::Bundle`] describes waves (tests) and their recipes
//! (variants). Each wave is validated into a [`validate::TestDefinition`],
//! wired to host adapters by the [`registry::Registry`], and decided once per
//! page view by its [`engine::ActivationEngine`]:
//!
//! ```text
//! preview > divert > sampling > sticky reuse > assignment > exclusion > execution
//! ```
//!
//! Decisions persist in one cookie per wave (`"<0|1>[.<recipeId>]"`), so a
//! returning visitor sees the same recipe without a new draw.

pub mod cli;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod options;
pub mod page;
pub mod random;
pub mod registry;
pub mod selector;
pub mod store;
pub mod telemetry;
pub mod validate;

pub use config::Bundle;
pub use definition::{RecipeSpec, Trigger, WaveSpec, WaveState};
pub use engine::{ActivationEngine, ActivationPath, ActivationReport, ExclusionReason};
pub use error::{ConfigError, ExecutionError, LoadError, RecipeError};
pub use options::{EffectiveOptions, Exclusion, GlobalOptions};
pub use registry::Registry;
pub use store::{CookieJar, MemoryJar, StoredDecision};
pub use telemetry::{RecordingTelemetry, TelemetryEvent, TelemetryPort};
pub use validate::{validate, TestDefinition};
