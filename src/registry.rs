//! # Stage: Registry
//!
//! ## Responsibility
//! Page-scoped map from wave id to its [`ActivationEngine`]. Created at page
//! load with the host adapters, dropped at unload. Every engine built here
//! shares the registry's jar, page, telemetry and global options.
//!
//! ## Guarantees
//! - While the global [`Exclusion`] holds, `add` logs and returns `Ok(None)`
//!   without validating the definition or firing its trigger
//! - Otherwise invalid definitions fail with a [`ConfigError`] before any
//!   cookie is read
//! - Wave ids are unique ([`ConfigError::DuplicateId`])
//! - A wave's trigger fires exactly once, right after registration

use std::{collections::HashMap, fmt, sync::Arc};

use tracing::{debug, warn};

use crate::{
    definition::WaveSpec,
    engine::ActivationEngine,
    error::ConfigError,
    options::{Exclusion, GlobalOptions},
    page::{Page, StaticPage},
    random::{RandomSource, SharedLcg},
    store::{CookieJar, MemoryJar},
    telemetry::{NoopTelemetry, TelemetryPort},
    validate::validate,
};

type RandomFactory = dyn Fn(&str) -> Box<dyn RandomSource> + Send + Sync;

pub struct Registry {
    options: GlobalOptions,
    jar: Arc<dyn CookieJar>,
    page: Arc<dyn Page>,
    telemetry: Arc<dyn TelemetryPort>,
    random: Arc<RandomFactory>,
    exclusion: Exclusion,
    waves: HashMap<String, ActivationEngine>,
    order: Vec<String>,
}

impl Registry {
    pub fn new(options: GlobalOptions, jar: Arc<dyn CookieJar>, page: Arc<dyn Page>) -> Self {
        Self {
            options,
            jar,
            page,
            telemetry: Arc::new(NoopTelemetry),
            random: Arc::new(|_: &str| Box::new(SharedLcg) as Box<dyn RandomSource>),
            exclusion: Exclusion::Never,
            waves: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Registry over an in-memory jar and an empty page.
    pub fn in_memory(options: GlobalOptions) -> Self {
        Self::new(options, Arc::new(MemoryJar::new()), Arc::new(StaticPage::new()))
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryPort>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Source factory, called once per registered wave with its id.
    pub fn with_random<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Box<dyn RandomSource> + Send + Sync + 'static,
    {
        self.random = Arc::new(factory);
        self
    }

    pub fn with_exclusion(mut self, exclusion: Exclusion) -> Self {
        self.exclusion = exclusion;
        self
    }

    pub fn options(&self) -> &GlobalOptions {
        &self.options
    }

    pub fn is_excluded(&self) -> bool {
        self.exclusion.is_excluded()
    }

    /// Validate, build and register one wave, then fire its trigger.
    pub fn add(&mut self, spec: WaveSpec) -> Result<Option<&mut ActivationEngine>, ConfigError> {
        if self.exclusion.is_excluded() {
            warn!(target: "wave_bucket::registry", wave = %spec.id_or_empty(), "page excluded from all waves; not registering");
            return Ok(None);
        }

        let definition = validate(spec)?;
        let id = definition.id().to_string();
        if self.waves.contains_key(&id) {
            return Err(ConfigError::DuplicateId { id });
        }

        let trigger = definition.trigger().clone();
        let engine = ActivationEngine::builder(definition)
            .global_options(self.options.clone())
            .jar(Arc::clone(&self.jar))
            .page(Arc::clone(&self.page))
            .telemetry(Arc::clone(&self.telemetry))
            .boxed_random((self.random)(&id))
            .build();
        debug!(target: "wave_bucket::registry", wave = %id, key = %engine.store().key(), "wave registered");

        self.order.push(id.clone());
        let engine = self.waves.entry(id).or_insert(engine);
        trigger.fire(engine);
        Ok(Some(engine))
    }

    pub fn get(&self, id: &str) -> Option<&ActivationEngine> {
        self.waves.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ActivationEngine> {
        self.waves.get_mut(id)
    }

    /// Activate a registered wave. `None` when no such wave exists.
    pub fn activate(&mut self, id: &str) -> Option<bool> {
        self.waves.get_mut(id).map(ActivationEngine::activate)
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Engines in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ActivationEngine> {
        self.order.iter().filter_map(|id| self.waves.get(id))
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("options", &self.options)
            .field("exclusion", &self.exclusion)
            .field("waves", &self.order)
            .finish()
    }
}
