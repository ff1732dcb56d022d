use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use clap::{Parser, Subcommand};
use colored::*;
use serde::Serialize;

use crate::{
    config::Bundle,
    definition::{Trigger, WaveState},
    engine::ActivationPath,
    error::LoadError,
    page::StaticPage,
    random::{DrawContext, Lcg, RandomSource},
    registry::Registry,
    store::{MemoryJar, StoredDecision},
    validate::TestDefinition,
};

#[derive(Parser, Debug)]
#[command(name = "wave-bucket")]
#[command(version)]
#[command(about = "Check, simulate and debug experiment bundles")]
pub struct Args {
    /// Log engine decisions (same as RUST_LOG=wave_bucket=debug)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and validate a bundle, then list its waves
    Check {
        /// Bundle file (.toml or .json)
        bundle: PathBuf,
    },
    /// Bucket fresh visitors through every wave with in-memory cookies
    Simulate {
        bundle: PathBuf,

        /// Number of fresh visitors
        #[arg(long, default_value = "1000")]
        visitors: u32,

        /// Seed for the generator
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Force a recipe, as a preview link would (repeatable, WAVE=RECIPE)
        #[arg(long, value_parser = parse_preview)]
        preview: Vec<(String, String)>,

        /// Print the allocation as JSON
        #[arg(long)]
        json: bool,
    },
    /// Decode a persisted decision token such as `1.B`
    Decode {
        token: String,

        #[arg(long)]
        json: bool,
    },
}

pub fn parse_preview(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((wave, recipe)) if !wave.is_empty() && !recipe.is_empty() => Ok((wave.to_string(), recipe.to_string())),
        _ => Err(format!("expected WAVE=RECIPE, got '{s}'")),
    }
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

/// One row of `check` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveSummary {
    pub id: String,
    pub name: String,
    pub state: String,
    pub sample_rate: f64,
    pub recipes: Vec<String>,
}

impl From<&TestDefinition> for WaveSummary {
    fn from(def: &TestDefinition) -> Self {
        let state = match def.active_divert() {
            Some(recipe) => format!("{} -> {}", def.state(), recipe.id),
            None => def.state().to_string(),
        };
        let recipes = def
            .recipes()
            .iter()
            .map(|r| match r.sample_rate {
                Some(rate) => format!("{}({rate})", r.id),
                None => r.id.clone(),
            })
            .collect();
        Self { id: def.id().to_string(), name: def.name().to_string(), state, sample_rate: def.sample_rate(), recipes }
    }
}

pub fn check(bundle: &Bundle) -> Result<Vec<WaveSummary>, LoadError> {
    let mut bundle = bundle.clone();
    bundle.default_trigger(Trigger::deferred());
    let defs = bundle.validate_all()?;
    Ok(defs.iter().map(WaveSummary::from).collect())
}

pub fn render_check(rows: &[WaveSummary]) -> String {
    let mut out = format!("{:<16} {:<24} {:<14} {:>6}  {}\n", "ID", "NAME", "STATE", "RATE", "RECIPES").bold().to_string();
    for row in rows {
        let state = if row.state.starts_with("live") { row.state.green() } else { row.state.yellow() };
        out.push_str(&format!(
            "{:<16} {:<24} {:<14} {:>6.2}  {}\n",
            row.id,
            row.name,
            state,
            row.sample_rate,
            row.recipes.join(", ")
        ));
    }
    out
}

// ---------------------------------------------------------------------------
// simulate
// ---------------------------------------------------------------------------

/// One generator shared by every visitor of a run, so runs are reproducible.
#[derive(Debug, Clone)]
struct SeededStream(Arc<Mutex<Lcg>>);

impl RandomSource for SeededStream {
    fn next(&mut self, _ctx: DrawContext<'_>) -> f64 {
        match self.0.lock() {
            Ok(mut lcg) => lcg.next_value(),
            Err(poisoned) => poisoned.into_inner().next_value(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeTally {
    pub recipe: String,
    pub visitors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveTally {
    pub wave: String,
    pub state: WaveState,
    pub recipes: Vec<RecipeTally>,
    pub excluded: u64,
    pub diverted: u64,
    pub previewed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub visitors: u32,
    pub seed: u64,
    pub waves: Vec<WaveTally>,
}

pub fn simulate(
    bundle: &Bundle,
    visitors: u32,
    seed: u64,
    preview: &[(String, String)],
) -> Result<SimulationReport, LoadError> {
    let stream = SeededStream(Arc::new(Mutex::new(Lcg::with_seed(seed))));
    let query = preview
        .iter()
        .map(|(wave, recipe)| format!("{}_{wave}={recipe}", bundle.options.preview_prefix))
        .collect::<Vec<_>>()
        .join("&");

    let mut template = bundle.clone();
    template.default_trigger(Trigger::deferred());
    let defs = template.validate_all()?;

    let mut tallies: Vec<WaveTally> = defs
        .iter()
        .map(|d| WaveTally {
            wave: d.id().to_string(),
            state: d.state(),
            recipes: d.recipes().ids().map(|id| RecipeTally { recipe: id.to_string(), visitors: 0 }).collect(),
            excluded: 0,
            diverted: 0,
            previewed: 0,
            failed: 0,
        })
        .collect();
    let index: HashMap<String, usize> = tallies.iter().enumerate().map(|(i, t)| (t.wave.clone(), i)).collect();

    for _ in 0..visitors {
        let stream = stream.clone();
        let mut registry = Registry::new(
            bundle.options.clone(),
            Arc::new(MemoryJar::new()),
            Arc::new(StaticPage::with_query(query.clone())),
        )
        .with_random(move |_| Box::new(stream.clone()));
        template.clone().register(&mut registry)?;

        for id in registry.ids().map(str::to_owned).collect::<Vec<_>>() {
            registry.activate(&id);
            let (Some(engine), Some(&i)) = (registry.get(&id), index.get(&id)) else { continue };
            let Some(report) = engine.report() else { continue };
            let tally = &mut tallies[i];
            match report.path {
                ActivationPath::Excluded(_) | ActivationPath::DeadlineExpired => tally.excluded += 1,
                ActivationPath::Diverted => tally.diverted += 1,
                ActivationPath::Preview => tally.previewed += 1,
                ActivationPath::Assigned { .. } => {}
            }
            if let Some(recipe) = &report.recipe {
                if let Some(slot) = tally.recipes.iter_mut().find(|r| &r.recipe == recipe) {
                    slot.visitors += 1;
                }
                if !report.executed {
                    tally.failed += 1;
                }
            }
        }
    }

    Ok(SimulationReport { visitors, seed, waves: tallies })
}

pub fn render_simulation(report: &SimulationReport) -> String {
    let mut out = format!("{} visitors, seed {}\n", report.visitors, report.seed).bold().to_string();
    let total = report.visitors.max(1) as f64;
    for wave in &report.waves {
        out.push_str(&format!("\n{} ({})\n", wave.wave.cyan().bold(), wave.state));
        for r in &wave.recipes {
            out.push_str(&format!(
                "  {:<16} {:>8}  {:>6.2}%\n",
                r.recipe,
                r.visitors,
                r.visitors as f64 / total * 100.0
            ));
        }
        out.push_str(&format!("  {:<16} {:>8}\n", "excluded".dimmed(), wave.excluded));
        if wave.diverted > 0 {
            out.push_str(&format!("  {:<16} {:>8}\n", "diverted".yellow(), wave.diverted));
        }
        if wave.previewed > 0 {
            out.push_str(&format!("  {:<16} {:>8}\n", "previewed".yellow(), wave.previewed));
        }
        if wave.failed > 0 {
            out.push_str(&format!("  {:<16} {:>8}\n", "failed".red(), wave.failed));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

pub fn render_decode(decision: &StoredDecision) -> String {
    match (decision.in_test, decision.recipe.as_deref()) {
        (None, _) => "undecided".dimmed().to_string(),
        (Some(true), Some(recipe)) => format!("{} recipe {}", "in test".green(), recipe.bold()),
        (Some(true), None) => "in test".green().to_string(),
        (Some(false), Some(recipe)) => format!("{} (last recipe {})", "excluded".red(), recipe),
        (Some(false), None) => "excluded".red().to_string(),
    }
}

pub fn decode_json(decision: &StoredDecision) -> serde_json::Value {
    serde_json::json!({
        "inTest": decision.in_test,
        "recipe": decision.recipe,
        "token": decision.encode(),
    })
}
