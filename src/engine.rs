//! # Stage: Activation Engine
//!
//! ## Responsibility
//! Decide, persist and execute one wave for one page view. Sub-paths are
//! evaluated strictly in this order:
//!
//! 1. preview override (`?<preview_prefix>_<waveId>=<recipeId>`)
//! 2. divert override (live waves only; no exposure)
//! 3. sampling draw, only for undecided visitors on live waves
//! 4. sticky reuse of a stored decision
//! 5. recipe assignment (or exclusion when the stored recipe is gone)
//! 6. exclusion
//! 7. exposure + execution
//!
//! ## Guarantees
//! - `Idle → Activated` once; a second [`ActivationEngine::activate`] returns
//!   `false` with no writes and no telemetry
//! - A stored `in_test = 1` is never downgraded by sampling
//! - Recipe failures (errors and panics) stop at the execution boundary and
//!   are reported through telemetry, truncated to `max_error_length` chars
//!
//! ## NOT Responsible For
//! - When to activate (the wave's [`crate::definition::Trigger`])
//! - Cookie/page transport (host adapters)

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{
    definition::WaveState,
    error::ExecutionError,
    options::{EffectiveOptions, GlobalOptions},
    page::{parse_query, Page, StaticPage},
    random::{DrawContext, RandomSource, SharedLcg},
    selector,
    store::{CookieJar, DecisionStore, MemoryJar},
    telemetry::{NoopTelemetry, TelemetryPort},
    validate::{Recipe, TestDefinition},
};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Why a visitor is not in the wave for this page view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Lost the sampling draw just now.
    Sampled,
    /// The stored recipe no longer exists in the configuration.
    RecipeRemoved,
    /// A stored `in_test = 0` from an earlier page view.
    Previously,
    /// Undecided visitor on a staging wave.
    NotLive,
}

/// Which sub-path the activation took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationPath {
    Preview,
    Diverted,
    Assigned { new_to_test: bool },
    Excluded(ExclusionReason),
    /// The host's deadline elapsed before activation.
    DeadlineExpired,
}

/// Summary of the one activation an engine performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub path: ActivationPath,
    pub recipe: Option<String>,
    /// `true` when a recipe ran to completion.
    pub executed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Activated,
}

// ---------------------------------------------------------------------------
// ActivationEngine
// ---------------------------------------------------------------------------

/// One wave, wired to its adapters, for one page view.
pub struct ActivationEngine {
    definition: TestDefinition,
    options: EffectiveOptions,
    store: DecisionStore,
    random: Box<dyn RandomSource>,
    telemetry: Arc<dyn TelemetryPort>,
    page: Arc<dyn Page>,
    phase: Phase,
    decision_idx: u32,
    chosen: Option<String>,
    diverted: bool,
    new_to_test: bool,
    report: Option<ActivationReport>,
}

impl ActivationEngine {
    pub fn builder(definition: TestDefinition) -> EngineBuilder {
        EngineBuilder::new(definition)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    pub fn options(&self) -> &EffectiveOptions {
        &self.options
    }

    pub fn store(&self) -> &DecisionStore {
        &self.store
    }

    pub fn is_activated(&self) -> bool {
        self.phase == Phase::Activated
    }

    pub fn is_diverted(&self) -> bool {
        self.diverted
    }

    pub fn is_new_to_test(&self) -> bool {
        self.new_to_test
    }

    /// Draws taken so far in this activation.
    pub fn decision_idx(&self) -> u32 {
        self.decision_idx
    }

    /// The recipe picked for this page view, if any.
    pub fn chosen_recipe(&self) -> Option<&Recipe> {
        self.chosen.as_deref().and_then(|id| self.definition.recipes().get(id))
    }

    pub fn report(&self) -> Option<&ActivationReport> {
        self.report.as_ref()
    }

    /// Query parameter that forces a recipe for this wave.
    pub fn preview_param(&self) -> String {
        format!("{}_{}", self.options.preview_prefix, self.definition.id())
    }

    /// Deadline the host should enforce, when the wave declares one.
    pub fn deadline(&self) -> Option<Duration> {
        self.definition
            .unveil()
            .filter(|u| u.timeout_ms > 0)
            .map(|u| Duration::from_millis(u.timeout_ms))
    }

    pub fn needs_deadline(&self) -> bool {
        self.deadline().is_some()
    }

    // -----------------------------------------------------------------------
    // Activation
    // -----------------------------------------------------------------------

    /// Decide and execute. Returns `true` only when a recipe ran successfully.
    pub fn activate(&mut self) -> bool {
        if self.phase == Phase::Activated {
            return false;
        }
        self.phase = Phase::Activated;
        self.decision_idx = 0;

        let id = self.definition.id().to_string();

        // 1. preview
        if let Some(recipe_id) = self.preview_recipe() {
            info!(target: "wave_bucket::engine", wave = %id, recipe = %recipe_id, "forcing recipe from preview parameter");
            self.store.write(true, Some(&recipe_id));
            return self.finish(ActivationPath::Preview, recipe_id);
        }

        // 2. divert
        if let Some(recipe) = self.definition.active_divert() {
            let recipe_id = recipe.id.clone();
            info!(target: "wave_bucket::engine", wave = %id, recipe = %recipe_id, "wave diverted");
            self.diverted = true;
            return self.finish(ActivationPath::Diverted, recipe_id);
        }

        // 3. sampling, only for undecided visitors on live waves
        let stored = self.store.read();
        let mut in_test = stored.in_test;
        let mut excluded_by_sample = false;
        if in_test.is_none() && self.definition.state() == WaveState::Live {
            let rate = self.definition.sample_rate();
            let admitted = rate > 0.0 && self.draw() <= rate;
            debug!(target: "wave_bucket::engine", wave = %id, admitted, sample_rate = rate, "sampling decision");
            in_test = Some(admitted);
            self.new_to_test = admitted;
            excluded_by_sample = !admitted;
        }

        match in_test {
            // 4./5. sticky reuse or assignment
            Some(true) => {
                self.store.set_in_test(true);
                let recipe_id = match stored.active_recipe() {
                    Some(recipe_id) => recipe_id.to_string(),
                    None => {
                        let draw = self.draw();
                        selector::select(self.definition.recipes(), draw).id.clone()
                    }
                };

                if !self.definition.recipes().contains(&recipe_id) {
                    warn!(target: "wave_bucket::engine", wave = %id, recipe = %recipe_id,
                        "stored recipe no longer exists; excluding visitor");
                    self.store.set_in_test(false);
                    self.report = Some(ActivationReport {
                        path: ActivationPath::Excluded(ExclusionReason::RecipeRemoved),
                        recipe: None,
                        executed: false,
                    });
                    return false;
                }
                self.store.set_recipe(&recipe_id);

                debug!(target: "wave_bucket::engine", wave = %id, recipe = %recipe_id,
                    new_to_test = self.new_to_test, "visitor assigned");
                self.chosen = Some(recipe_id.clone());
                if !self.definition.manual_exposure() {
                    self.track_exposure();
                }
                let new_to_test = self.new_to_test;
                self.finish(ActivationPath::Assigned { new_to_test }, recipe_id)
            }
            // 6. exclusion
            Some(false) => {
                let reason = if excluded_by_sample {
                    self.store.set_in_test(false);
                    ExclusionReason::Sampled
                } else {
                    ExclusionReason::Previously
                };
                debug!(target: "wave_bucket::engine", wave = %id, ?reason, "visitor excluded");
                self.report = Some(ActivationReport { path: ActivationPath::Excluded(reason), recipe: None, executed: false });
                false
            }
            None => {
                debug!(target: "wave_bucket::engine", wave = %id, state = %self.definition.state(), "wave not live; undecided visitor left out");
                self.report = Some(ActivationReport {
                    path: ActivationPath::Excluded(ExclusionReason::NotLive),
                    recipe: None,
                    executed: false,
                });
                false
            }
        }
    }

    /// The host's deadline elapsed before activation. Returning visitors get
    /// the fallback (or their stored) recipe; undecided visitors get nothing.
    /// Always reports a timeout failure. No-op once activated.
    pub fn expire_deadline(&mut self) -> bool {
        if self.phase == Phase::Activated {
            return false;
        }
        self.phase = Phase::Activated;

        let stored = self.store.read();
        let fallback = self.definition.unveil().and_then(|u| u.fallback_recipe.clone());
        let returning = stored.active_recipe().map(str::to_owned);
        let ultimate = fallback.or_else(|| returning.clone());

        warn!(target: "wave_bucket::engine", wave = %self.definition.id(),
            recipe = ultimate.as_deref().unwrap_or(""), "decision deadline elapsed");

        let mut executed = false;
        let mut recipe = None;
        if returning.is_some() {
            if let Some(recipe_id) = ultimate.clone().filter(|r| self.definition.recipes().contains(r)) {
                self.chosen = Some(recipe_id.clone());
                self.diverted = self.definition.active_divert().is_some();
                if !self.definition.manual_exposure() {
                    self.track_exposure();
                }
                executed = self.run_chosen();
                recipe = Some(recipe_id);
            }
        }

        self.telemetry.on_timeout_failure(self, ultimate.as_deref());
        self.report = Some(ActivationReport { path: ActivationPath::DeadlineExpired, recipe, executed });
        executed
    }

    // -----------------------------------------------------------------------
    // Exposure
    // -----------------------------------------------------------------------

    /// Report exposure for the chosen recipe. Suppressed for diverted waves
    /// and before a recipe is chosen. Public for `manual_exposure` waves.
    pub fn track_exposure(&self) -> bool {
        if self.diverted || self.chosen.is_none() {
            debug!(target: "wave_bucket::engine", wave = %self.definition.id(), diverted = self.diverted,
                "exposure suppressed");
            return false;
        }
        self.telemetry.on_exposure(self);
        true
    }

    // -----------------------------------------------------------------------
    // Execution boundary
    // -----------------------------------------------------------------------

    /// Run a recipe by id, bypassing the decision logic. Returns `false` for
    /// unknown ids and for failed execution.
    pub fn run_recipe(&mut self, recipe_id: &str) -> bool {
        if !self.definition.recipes().contains(recipe_id) {
            return false;
        }
        self.chosen = Some(recipe_id.to_string());
        self.run_chosen()
    }

    /// Inject payload then call behaviour, catching errors and panics.
    pub fn execute(&self, recipe: &Recipe) -> Result<(), ExecutionError> {
        if let Some(css) = self.definition.css() {
            self.page.inject_css(css);
        }
        if let Some(css) = recipe.css.as_deref() {
            self.page.inject_css(css);
        }
        let Some(behavior) = recipe.behavior.clone() else {
            return Ok(());
        };
        match panic::catch_unwind(AssertUnwindSafe(|| behavior.call(self))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ExecutionError::Failed { recipe: recipe.id.clone(), source }),
            Err(payload) => Err(ExecutionError::Panicked {
                recipe: recipe.id.clone(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    fn run_chosen(&self) -> bool {
        let Some(recipe) = self.chosen_recipe().cloned() else {
            return false;
        };
        match self.execute(&recipe) {
            Ok(()) => {
                debug!(target: "wave_bucket::engine", wave = %self.definition.id(), recipe = %recipe.id, "recipe run");
                true
            }
            Err(err) => {
                let text = truncate_chars(&err.report_text(), self.options.max_error_length);
                self.telemetry.on_recipe_failure(self, &text);
                error!(target: "wave_bucket::engine", wave = %self.definition.id(), recipe = %recipe.id,
                    error = %err, "recipe failed");
                false
            }
        }
    }

    fn finish(&mut self, path: ActivationPath, recipe_id: String) -> bool {
        self.chosen = Some(recipe_id.clone());
        let executed = self.run_chosen();
        self.report = Some(ActivationReport { path, recipe: Some(recipe_id), executed });
        executed
    }

    fn preview_recipe(&self) -> Option<String> {
        let params = parse_query(&self.page.query());
        params
            .get(&self.preview_param())
            .filter(|id| self.definition.recipes().contains(id))
            .cloned()
    }

    fn draw(&mut self) -> f64 {
        let ctx = DrawContext { wave_id: self.definition.id(), decision_idx: self.decision_idx };
        let value = self.random.next(ctx);
        self.decision_idx += 1;
        value
    }
}

impl fmt::Debug for ActivationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationEngine")
            .field("wave", &self.definition.id())
            .field("state", &self.definition.state())
            .field("phase", &self.phase)
            .field("chosen", &self.chosen)
            .field("diverted", &self.diverted)
            .field("store", &self.store)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "recipe panicked".to_string()
    }
}

/// Cut to at most `max` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// EngineBuilder
// ---------------------------------------------------------------------------

/// Wires a validated definition to its adapters. Unset adapters default to
/// an in-memory jar, an empty page, no telemetry and [`SharedLcg`].
pub struct EngineBuilder {
    definition: TestDefinition,
    global: GlobalOptions,
    jar: Option<Arc<dyn CookieJar>>,
    page: Option<Arc<dyn Page>>,
    telemetry: Option<Arc<dyn TelemetryPort>>,
    random: Option<Box<dyn RandomSource>>,
}

impl EngineBuilder {
    pub fn new(definition: TestDefinition) -> Self {
        Self { definition, global: GlobalOptions::default(), jar: None, page: None, telemetry: None, random: None }
    }

    pub fn global_options(mut self, global: GlobalOptions) -> Self {
        self.global = global;
        self
    }

    pub fn jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.jar = Some(jar);
        self
    }

    pub fn page(mut self, page: Arc<dyn Page>) -> Self {
        self.page = Some(page);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetryPort>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn random(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Some(Box::new(random));
        self
    }

    pub fn boxed_random(mut self, random: Box<dyn RandomSource>) -> Self {
        self.random = Some(random);
        self
    }

    pub fn build(self) -> ActivationEngine {
        let options = EffectiveOptions::merge(&self.global, self.definition.overrides());
        let jar = self.jar.unwrap_or_else(|| Arc::new(MemoryJar::new()));
        let store = DecisionStore::new(jar, self.definition.id(), self.definition.state(), &options);
        ActivationEngine {
            options,
            store,
            random: self.random.unwrap_or_else(|| Box::new(SharedLcg)),
            telemetry: self.telemetry.unwrap_or_else(|| Arc::new(NoopTelemetry)),
            page: self.page.unwrap_or_else(|| Arc::new(StaticPage::new())),
            phase: Phase::Idle,
            decision_idx: 0,
            chosen: None,
            diverted: false,
            new_to_test: false,
            report: None,
            definition: self.definition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        definition::{RecipeSpec, Trigger, WaveSpec},
        random::ScriptedSource,
        store::StoredDecision,
        telemetry::{RecordingTelemetry, TelemetryEvent},
        validate::validate,
    };

    struct Harness {
        jar: MemoryJar,
        page: StaticPage,
        telemetry: RecordingTelemetry,
    }

    impl Harness {
        fn new() -> Self {
            Self { jar: MemoryJar::new(), page: StaticPage::new(), telemetry: RecordingTelemetry::new() }
        }

        fn with_query(query: &str) -> Self {
            Self { page: StaticPage::with_query(query), ..Self::new() }
        }

        fn engine(&self, spec: WaveSpec, draws: &[f64]) -> ActivationEngine {
            ActivationEngine::builder(validate(spec).unwrap())
                .jar(Arc::new(self.jar.clone()))
                .page(Arc::new(self.page.clone()))
                .telemetry(Arc::new(self.telemetry.clone()))
                .random(ScriptedSource::new(draws.to_vec()))
                .build()
        }

        fn cookie(&self, key: &str) -> Option<String> {
            self.jar.get(key)
        }
    }

    fn live_ab() -> WaveSpec {
        WaveSpec::new("w1", "Wave one")
            .state(WaveState::Live)
            .recipe("0", RecipeSpec::named("Control"))
            .recipe("1", RecipeSpec::named("Treatment"))
            .trigger(Trigger::deferred())
    }

    #[test]
    fn test_new_visitor_admitted_and_assigned() {
        let h = Harness::new();
        let mut e = h.engine(live_ab(), &[0.5, 0.7]);
        assert!(e.activate());
        assert_eq!(e.chosen_recipe().unwrap().id, "1");
        assert_eq!(h.cookie("_wave_w1").as_deref(), Some("1.1"));
        assert_eq!(e.decision_idx(), 2);
        assert!(e.is_new_to_test());
        assert_eq!(h.telemetry.exposures(), 1);
        assert_eq!(e.report().unwrap().path, ActivationPath::Assigned { new_to_test: true });
    }

    #[test]
    fn test_sampling_draw_equal_to_rate_admits() {
        let h = Harness::new();
        let mut e = h.engine(live_ab().sample_rate(0.4), &[0.4, 0.1]);
        assert!(e.activate());
        assert_eq!(h.cookie("_wave_w1").as_deref(), Some("1.0"));
    }

    #[test]
    fn test_sampling_exclusion_persists_zero() {
        let h = Harness::new();
        let mut e = h.engine(live_ab().sample_rate(0.3), &[0.31]);
        assert!(!e.activate());
        assert_eq!(h.cookie("_wave_w1").as_deref(), Some("0"));
        assert!(h.telemetry.is_empty());
        assert_eq!(e.report().unwrap().path, ActivationPath::Excluded(ExclusionReason::Sampled));
    }

    #[test]
    fn test_zero_sample_rate_excludes_without_drawing() {
        let h = Harness::new();
        let mut e = h.engine(live_ab().sample_rate(0.0), &[0.0]);
        assert!(!e.activate());
        assert_eq!(e.decision_idx(), 0);
        assert_eq!(h.cookie("_wave_w1").as_deref(), Some("0"));
    }

    #[test]
    fn test_previously_excluded_is_not_redrawn() {
        let h = Harness { jar: MemoryJar::new().with("_wave_w1", "0"), ..Harness::new() };
        let mut e = h.engine(live_ab(), &[0.0]);
        assert!(!e.activate());
        assert_eq!(e.decision_idx(), 0);
        assert_eq!(h.jar.write_count(), 0);
        assert_eq!(e.report().unwrap().path, ActivationPath::Excluded(ExclusionReason::Previously));
    }

    #[test]
    fn test_staging_undecided_visitor_is_left_alone() {
        let h = Harness::new();
        let mut e = h.engine(live_ab().state(WaveState::Staging), &[0.0]);
        assert!(!e.activate());
        assert_eq!(h.jar.write_count(), 0);
        assert_eq!(e.report().unwrap().path, ActivationPath::Excluded(ExclusionReason::NotLive));
    }

    #[test]
    fn test_staging_with_sticky_staging_cookie_runs_recipe() {
        let h = Harness { jar: MemoryJar::new().with("_wave_w1-staging", "1.1"), ..Harness::new() };
        let mut e = h.engine(live_ab().state(WaveState::Staging), &[]);
        assert!(e.activate());
        assert_eq!(e.chosen_recipe().unwrap().id, "1");
        assert_eq!(h.telemetry.exposures(), 1);
    }

    #[test]
    fn test_second_activate_is_noop() {
        let h = Harness::new();
        let mut e = h.engine(live_ab(), &[0.1, 0.1]);
        assert!(e.activate());
        let writes = h.jar.write_count();
        let events = h.telemetry.events().len();
        assert!(!e.activate());
        assert_eq!(h.jar.write_count(), writes);
        assert_eq!(h.telemetry.events().len(), events);
    }

    #[test]
    fn test_manual_exposure_skips_automatic_tracking() {
        let h = Harness::new();
        let mut e = h.engine(live_ab().manual_exposure(true), &[0.1, 0.1]);
        assert!(e.activate());
        assert_eq!(h.telemetry.exposures(), 0);
        assert!(e.track_exposure());
        assert_eq!(h.telemetry.exposures(), 1);
    }

    #[test]
    fn test_track_exposure_before_choice_is_suppressed() {
        let h = Harness::new();
        let e = h.engine(live_ab(), &[]);
        assert!(!e.track_exposure());
        assert!(h.telemetry.is_empty());
    }

    #[test]
    fn test_css_injected_wave_then_recipe() {
        let h = Harness::new();
        let spec = WaveSpec::new("w1", "W")
            .state(WaveState::Live)
            .css(".wave{}")
            .recipe("0", RecipeSpec::named("A").css(".a{}"))
            .recipe("1", RecipeSpec::named("B").css(".b{}"))
            .trigger(Trigger::deferred());
        let mut e = h.engine(spec, &[0.0, 0.9]);
        assert!(e.activate());
        assert_eq!(h.page.styles(), vec![".wave{}".to_string(), ".b{}".to_string()]);
    }

    #[test]
    fn test_behavior_sees_engine() {
        let h = Harness::new();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let s = seen.clone();
        let mut spec = live_ab();
        spec.bind_behavior("1", move |engine| {
            *s.lock().unwrap() = engine.chosen_recipe().map(|r| r.name.clone());
            Ok(())
        });
        let mut e = h.engine(spec, &[0.0, 0.9]);
        assert!(e.activate());
        assert_eq!(seen.lock().unwrap().as_deref(), Some("Treatment"));
    }

    #[test]
    fn test_recipe_error_is_reported_and_contained() {
        let h = Harness::new();
        let mut spec = live_ab();
        spec.bind_behavior("0", |_| Err("selector not found".into()));
        let mut e = h.engine(spec, &[0.0, 0.0]);
        assert!(!e.activate());
        assert_eq!(h.telemetry.exposures(), 1);
        assert_eq!(
            h.telemetry.events().last(),
            Some(&TelemetryEvent::RecipeFailure {
                wave: "w1".into(),
                recipe: Some("0".into()),
                error: "selector not found".into()
            })
        );
        assert_eq!(h.cookie("_wave_w1").as_deref(), Some("1.0"));
        assert!(!e.report().unwrap().executed);
    }

    #[test]
    fn test_recipe_panic_is_caught() {
        let h = Harness::new();
        let mut spec = live_ab();
        spec.bind_behavior("0", |_| panic!("kaboom"));
        let mut e = h.engine(spec, &[0.0, 0.0]);
        assert!(!e.activate());
        assert_eq!(h.telemetry.failures(), 1);
        match h.telemetry.events().last() {
            Some(TelemetryEvent::RecipeFailure { error, .. }) => assert_eq!(error, "kaboom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_failure_text_truncated() {
        let h = Harness::new();
        let mut spec = live_ab();
        spec.options.max_error_length = Some(10);
        spec.bind_behavior("0", |_| Err("x".repeat(50).into()));
        let mut e = h.engine(spec, &[0.0, 0.0]);
        e.activate();
        match h.telemetry.events().last() {
            Some(TelemetryEvent::RecipeFailure { error, .. }) => assert_eq!(error.len(), 10),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_truncate_chars_respects_code_points() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn test_run_recipe_unknown_id() {
        let h = Harness::new();
        let mut e = h.engine(live_ab(), &[]);
        assert!(!e.run_recipe("nope"));
        assert!(e.run_recipe("0"));
    }

    #[test]
    fn test_preview_param_name() {
        let h = Harness::new();
        let e = h.engine(live_ab(), &[]);
        assert_eq!(e.preview_param(), "wave_w1");
    }

    #[test]
    fn test_invalid_preview_falls_through_to_sampling() {
        let h = Harness::with_query("?wave_w1=missing");
        let mut e = h.engine(live_ab(), &[0.0, 0.0]);
        assert!(e.activate());
        assert_eq!(e.report().unwrap().path, ActivationPath::Assigned { new_to_test: true });
    }

    #[test]
    fn test_preview_on_excluded_visitor_flips_flag() {
        let h = Harness { page: StaticPage::with_query("wave_w1=1"), jar: MemoryJar::new().with("_wave_w1", "0"), ..Harness::new() };
        let mut e = h.engine(live_ab(), &[]);
        assert!(e.activate());
        assert_eq!(h.cookie("_wave_w1").as_deref(), Some("1.1"));
        assert_eq!(h.telemetry.exposures(), 0);
    }

    #[test]
    fn test_deadline_returning_visitor_runs_fallback() {
        let h = Harness { jar: MemoryJar::new().with("_wave_w1", "1.1"), ..Harness::new() };
        let mut e = h.engine(live_ab().unveil(500, Some("0")), &[]);
        assert_eq!(e.deadline(), Some(Duration::from_millis(500)));
        assert!(e.expire_deadline());
        assert_eq!(e.chosen_recipe().unwrap().id, "0");
        assert_eq!(h.telemetry.exposures(), 1);
        assert_eq!(h.telemetry.timeouts(), 1);
        assert!(!e.activate());
        assert_eq!(h.cookie("_wave_w1").as_deref(), Some("1.1"));
    }

    #[test]
    fn test_deadline_new_visitor_runs_nothing() {
        let h = Harness::new();
        let mut e = h.engine(live_ab().unveil(500, None), &[]);
        assert!(!e.expire_deadline());
        assert!(e.chosen_recipe().is_none());
        assert_eq!(h.telemetry.events(), vec![TelemetryEvent::TimeoutFailure { wave: "w1".into(), recipe: None }]);
        assert_eq!(h.jar.write_count(), 0);
    }

    #[test]
    fn test_deadline_after_activation_is_noop() {
        let h = Harness::new();
        let mut e = h.engine(live_ab().unveil(500, None), &[0.0, 0.0]);
        assert!(e.activate());
        assert!(!e.expire_deadline());
        assert_eq!(h.telemetry.timeouts(), 0);
    }

    #[test]
    fn test_no_deadline_without_unveil() {
        let h = Harness::new();
        let e = h.engine(live_ab(), &[]);
        assert!(!e.needs_deadline());
        let e = h.engine(live_ab().unveil(0, None), &[]);
        assert!(!e.needs_deadline());
    }

    #[test]
    fn test_store_view_matches_jar() {
        let h = Harness::new();
        let mut e = h.engine(live_ab(), &[0.0, 0.6]);
        e.activate();
        assert_eq!(
            StoredDecision::decode(&h.cookie(e.store().key()).unwrap()),
            StoredDecision::decided(true, Some("1"))
        );
    }
}
