//! # Stage: Bundle Loading
//!
//! ## Responsibility
//! Read a compiled bundle, `{ options, waves: [...] }`, from TOML or JSON.
//! Inactive waves are dropped here and never reach the validator.
//!
//! ## Guarantees
//! - Recipe declaration order survives both formats
//! - Wave ids are unique within a bundle ([`LoadError::DuplicateWave`])
//!
//! ## NOT Responsible For
//! - Binding callbacks: host code does that by id after loading
//!   ([`Bundle::bind_behavior`], [`Bundle::bind_trigger`])

use std::{collections::HashSet, fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    definition::{Trigger, WaveSpec, WaveState},
    engine::ActivationEngine,
    error::{ConfigError, LoadError, RecipeError},
    options::GlobalOptions,
    registry::Registry,
    validate::{validate, TestDefinition},
};

/// Compiled configuration for one page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Bundle {
    pub options: GlobalOptions,
    pub waves: Vec<WaveSpec>,
}

impl Bundle {
    /// Load by extension: `.toml` or `.json`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
        match ext.as_str() {
            "toml" => Self::from_toml_str(&text),
            "json" => Self::from_json_str(&text),
            other => Err(LoadError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, LoadError> {
        let raw: Bundle = toml::from_str(text)?;
        raw.finish()
    }

    pub fn from_json_str(text: &str) -> Result<Self, LoadError> {
        let raw: Bundle = serde_json::from_str(text)?;
        raw.finish()
    }

    fn finish(mut self) -> Result<Self, LoadError> {
        self.waves.retain(|w| {
            let keep = w.state != WaveState::Inactive;
            if !keep {
                debug!(target: "wave_bucket::config", wave = %w.id_or_empty(), "skipping inactive wave");
            }
            keep
        });

        let mut seen = HashSet::new();
        for wave in &self.waves {
            if let Some(id) = &wave.id {
                if !seen.insert(id.as_str()) {
                    return Err(LoadError::DuplicateWave(id.clone()));
                }
            }
        }
        Ok(self)
    }

    pub fn wave(&self, id: &str) -> Option<&WaveSpec> {
        self.waves.iter().find(|w| w.id.as_deref() == Some(id))
    }

    pub fn wave_mut(&mut self, id: &str) -> Option<&mut WaveSpec> {
        self.waves.iter_mut().find(|w| w.id.as_deref() == Some(id))
    }

    /// Attach behaviour to `wave_id`/`recipe_id`. `false` if either is unknown.
    pub fn bind_behavior<F>(&mut self, wave_id: &str, recipe_id: &str, f: F) -> bool
    where
        F: Fn(&ActivationEngine) -> Result<(), RecipeError> + Send + Sync + 'static,
    {
        self.wave_mut(wave_id).map(|w| w.bind_behavior(recipe_id, f)).unwrap_or(false)
    }

    pub fn bind_trigger(&mut self, wave_id: &str, trigger: Trigger) -> bool {
        match self.wave_mut(wave_id) {
            Some(w) => {
                w.trigger = Some(trigger);
                true
            }
            None => false,
        }
    }

    /// Give every wave without a trigger the same one.
    pub fn default_trigger(&mut self, trigger: Trigger) {
        for wave in self.waves.iter_mut().filter(|w| w.trigger.is_none()) {
            wave.trigger = Some(trigger.clone());
        }
    }

    /// Validate every wave; the first failure wins.
    pub fn validate_all(&self) -> Result<Vec<TestDefinition>, ConfigError> {
        self.waves.iter().cloned().map(validate).collect()
    }

    /// Register every wave, in bundle order. Returns the ids registered.
    pub fn register(self, registry: &mut Registry) -> Result<Vec<String>, ConfigError> {
        let mut ids = Vec::with_capacity(self.waves.len());
        for wave in self.waves {
            let id = wave.id_or_empty().to_string();
            if registry.add(wave)?.is_some() {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}
