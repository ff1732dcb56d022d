//! # Stage: Telemetry Port
//!
//! ## Responsibility
//! The contract the engine reports through: exposure, recipe failure and
//! (optionally) decision-deadline failure. Analytics live outside this crate.
//!
//! ## Implementations
//! - [`NoopTelemetry`]: default when nothing is configured
//! - [`TracingTelemetry`]: emits each event as a `tracing` event
//! - [`RecordingTelemetry`]: keeps [`TelemetryEvent`]s in memory

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::engine::ActivationEngine;

/// Callbacks the engine invokes. Implementations must not panic.
pub trait TelemetryPort: Send + Sync {
    /// A visitor was shown a resolved recipe.
    fn on_exposure(&self, wave: &ActivationEngine);
    /// Recipe execution failed; `error` is already truncated.
    fn on_recipe_failure(&self, wave: &ActivationEngine, error: &str);
    /// The host's decision deadline elapsed first.
    fn on_timeout_failure(&self, _wave: &ActivationEngine, _recipe: Option<&str>) {}
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryPort for NoopTelemetry {
    fn on_exposure(&self, _wave: &ActivationEngine) {}
    fn on_recipe_failure(&self, _wave: &ActivationEngine, _error: &str) {}
}

/// Reports through `tracing` under target `wave_bucket::telemetry`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetryPort for TracingTelemetry {
    fn on_exposure(&self, wave: &ActivationEngine) {
        info!(
            target: "wave_bucket::telemetry",
            wave = %wave.definition().id(),
            recipe = wave.chosen_recipe().map(|r| r.id.as_str()).unwrap_or(""),
            "exposure"
        );
    }

    fn on_recipe_failure(&self, wave: &ActivationEngine, err: &str) {
        error!(
            target: "wave_bucket::telemetry",
            wave = %wave.definition().id(),
            recipe = wave.chosen_recipe().map(|r| r.id.as_str()).unwrap_or(""),
            error = %err,
            "recipe failure"
        );
    }

    fn on_timeout_failure(&self, wave: &ActivationEngine, recipe: Option<&str>) {
        warn!(
            target: "wave_bucket::telemetry",
            wave = %wave.definition().id(),
            recipe = recipe.unwrap_or(""),
            "decision deadline elapsed"
        );
    }
}

// ---------------------------------------------------------------------------
// RecordingTelemetry
// ---------------------------------------------------------------------------

/// What happened, as captured by [`RecordingTelemetry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Exposure { wave: String, wave_name: String, recipe: String, recipe_name: String },
    RecipeFailure { wave: String, recipe: Option<String>, error: String },
    TimeoutFailure { wave: String, recipe: Option<String> },
}

impl TelemetryEvent {
    pub fn wave(&self) -> &str {
        match self {
            TelemetryEvent::Exposure { wave, .. }
            | TelemetryEvent::RecipeFailure { wave, .. }
            | TelemetryEvent::TimeoutFailure { wave, .. } => wave,
        }
    }
}

/// Keeps every event; clones share one log.
#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn exposures(&self) -> usize {
        self.count(|e| matches!(e, TelemetryEvent::Exposure { .. }))
    }

    pub fn failures(&self) -> usize {
        self.count(|e| matches!(e, TelemetryEvent::RecipeFailure { .. }))
    }

    pub fn timeouts(&self) -> usize {
        self.count(|e| matches!(e, TelemetryEvent::TimeoutFailure { .. }))
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().map(|e| e.is_empty()).unwrap_or(true)
    }

    fn count(&self, pred: impl Fn(&TelemetryEvent) -> bool) -> usize {
        self.events.lock().map(|e| e.iter().filter(|ev| pred(ev)).count()).unwrap_or(0)
    }

    fn push(&self, event: TelemetryEvent) {
        if let Ok(mut e) = self.events.lock() {
            e.push(event);
        }
    }
}

impl TelemetryPort for RecordingTelemetry {
    fn on_exposure(&self, wave: &ActivationEngine) {
        let (recipe, recipe_name) = wave
            .chosen_recipe()
            .map(|r| (r.id.clone(), r.name.clone()))
            .unwrap_or_default();
        self.push(TelemetryEvent::Exposure {
            wave: wave.definition().id().to_string(),
            wave_name: wave.definition().name().to_string(),
            recipe,
            recipe_name,
        });
    }

    fn on_recipe_failure(&self, wave: &ActivationEngine, error: &str) {
        self.push(TelemetryEvent::RecipeFailure {
            wave: wave.definition().id().to_string(),
            recipe: wave.chosen_recipe().map(|r| r.id.clone()),
            error: error.to_string(),
        });
    }

    fn on_timeout_failure(&self, wave: &ActivationEngine, recipe: Option<&str>) {
        self.push(TelemetryEvent::TimeoutFailure {
            wave: wave.definition().id().to_string(),
            recipe: recipe.map(str::to_owned),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let ev = TelemetryEvent::TimeoutFailure { wave: "w1".into(), recipe: Some("1".into()) };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "timeout_failure");
        assert_eq!(json["wave"], "w1");
    }

    #[test]
    fn test_event_wave_accessor() {
        let ev = TelemetryEvent::RecipeFailure { wave: "w9".into(), recipe: None, error: "e".into() };
        assert_eq!(ev.wave(), "w9");
    }

    #[test]
    fn test_recording_starts_empty() {
        let t = RecordingTelemetry::new();
        assert!(t.is_empty());
        assert_eq!(t.exposures(), 0);
        assert_eq!(t.failures(), 0);
        assert_eq!(t.timeouts(), 0);
    }
}
