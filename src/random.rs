//! # Stage: Random Source
//!
//! ## Responsibility
//! Produce draws in `[0, 1)` for sampling and recipe selection. The engine
//! passes a [`DrawContext`] carrying the wave id and a per-activation draw
//! index so adapters can serve index-addressable sequences.
//!
//! ## Implementations
//! - [`SharedLcg`]: default; one process-wide seed, seeded from wall-clock
//!   time on first use, shared by every engine that uses it
//! - [`Lcg`]: the same generator with a private, pinned seed
//! - [`ScriptedSource`]: fixed draws addressed by `decision_idx`
//! - [`ThreadRngSource`]: `rand::thread_rng`

use std::{
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use once_cell::sync::Lazy;
use rand::Rng;

/// LCG multiplier.
pub const LCG_A: u64 = 9_301;
/// LCG increment.
pub const LCG_C: u64 = 49_297;
/// LCG modulus; draws are `seed / LCG_M`.
pub const LCG_M: u64 = 233_280;

/// Who is asking for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawContext<'a> {
    pub wave_id: &'a str,
    /// 0 for the first draw of an activation, 1 for the second, ...
    pub decision_idx: u32,
}

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send {
    fn next(&mut self, ctx: DrawContext<'_>) -> f64;
}

impl<F> RandomSource for F
where
    F: FnMut(DrawContext<'_>) -> f64 + Send,
{
    fn next(&mut self, ctx: DrawContext<'_>) -> f64 {
        self(ctx)
    }
}

fn lcg_step(seed: u64) -> u64 {
    (seed % LCG_M * LCG_A + LCG_C) % LCG_M
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Lcg / SharedLcg
// ---------------------------------------------------------------------------

/// Seeded linear-congruential generator with its own state.
#[derive(Debug, Clone)]
pub struct Lcg {
    seed: u64,
}

impl Lcg {
    pub fn with_seed(seed: u64) -> Self {
        Self { seed: seed % LCG_M }
    }

    pub fn from_clock() -> Self {
        Self::with_seed(clock_seed())
    }

    pub fn next_value(&mut self) -> f64 {
        self.seed = lcg_step(self.seed);
        self.seed as f64 / LCG_M as f64
    }
}

impl RandomSource for Lcg {
    fn next(&mut self, _ctx: DrawContext<'_>) -> f64 {
        self.next_value()
    }
}

static SHARED_SEED: Lazy<Mutex<u64>> = Lazy::new(|| Mutex::new(clock_seed() % LCG_M));

/// The default source: every instance advances one process-wide seed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedLcg;

impl SharedLcg {
    /// Pin the process-wide seed.
    pub fn reseed(seed: u64) {
        if let Ok(mut s) = SHARED_SEED.lock() {
            *s = seed % LCG_M;
        }
    }
}

impl RandomSource for SharedLcg {
    fn next(&mut self, _ctx: DrawContext<'_>) -> f64 {
        let mut guard = match SHARED_SEED.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = lcg_step(*guard);
        *guard as f64 / LCG_M as f64
    }
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// Replays fixed draws: `decision_idx` i gets `draws[i]`, clamped into `[0, 1)`.
/// Past the end, the last value repeats.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    draws: Vec<f64>,
    calls: usize,
}

impl ScriptedSource {
    pub fn new(draws: impl Into<Vec<f64>>) -> Self {
        Self { draws: draws.into(), calls: 0 }
    }

    /// Always returns `value`.
    pub fn constant(value: f64) -> Self {
        Self::new(vec![value])
    }

    /// How many draws were taken.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl RandomSource for ScriptedSource {
    fn next(&mut self, ctx: DrawContext<'_>) -> f64 {
        self.calls += 1;
        let idx = (ctx.decision_idx as usize).min(self.draws.len().saturating_sub(1));
        self.draws.get(idx).copied().unwrap_or(0.0).clamp(0.0, 1.0 - f64::EPSILON)
    }
}

// ---------------------------------------------------------------------------
// ThreadRngSource
// ---------------------------------------------------------------------------

/// Draws from `rand::thread_rng`; not reproducible.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn next(&mut self, _ctx: DrawContext<'_>) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(idx: u32) -> DrawContext<'static> {
        DrawContext { wave_id: "w", decision_idx: idx }
    }

    #[test]
    fn test_lcg_known_sequence() {
        let mut lcg = Lcg::with_seed(0);
        let first = lcg.next_value();
        assert!((first - 49_297.0 / 233_280.0).abs() < 1e-12);
        let second = lcg.next_value();
        let expected = ((49_297u64 * 9_301 + 49_297) % 233_280) as f64 / 233_280.0;
        assert!((second - expected).abs() < 1e-12);
    }

    #[test]
    fn test_lcg_pinned_seed_is_reproducible() {
        let mut a = Lcg::with_seed(1_700_000_000_000);
        let mut b = Lcg::with_seed(1_700_000_000_000);
        for _ in 0..100 {
            assert_eq!(a.next_value(), b.next_value());
        }
    }

    #[test]
    fn test_lcg_large_seed_matches_reduced_seed() {
        let big = 1_700_000_000_123u64;
        let mut a = Lcg::with_seed(big);
        let mut b = Lcg::with_seed(big % LCG_M);
        assert_eq!(a.next_value(), b.next_value());
    }

    #[test]
    fn test_lcg_values_in_unit_interval() {
        let mut lcg = Lcg::with_seed(42);
        for _ in 0..10_000 {
            let v = lcg.next_value();
            assert!((0.0..1.0).contains(&v), "v={v}");
        }
    }

    #[test]
    fn test_shared_lcg_successive_draws_differ() {
        let mut a = SharedLcg;
        let mut b = SharedLcg;
        let x = a.next(ctx(0));
        let y = b.next(ctx(0));
        assert!((0.0..1.0).contains(&x));
        assert!((0.0..1.0).contains(&y));
        assert_ne!(x, y);
    }

    #[test]
    fn test_scripted_is_index_addressed() {
        let mut s = ScriptedSource::new(vec![0.1, 0.9]);
        assert_eq!(s.next(ctx(1)), 0.9);
        assert_eq!(s.next(ctx(0)), 0.1);
        assert_eq!(s.next(ctx(7)), 0.9);
        assert_eq!(s.calls(), 3);
    }

    #[test]
    fn test_scripted_clamps_to_half_open() {
        let mut s = ScriptedSource::constant(1.0);
        assert!(s.next(ctx(0)) < 1.0);
        let mut empty = ScriptedSource::new(Vec::new());
        assert_eq!(empty.next(ctx(0)), 0.0);
    }

    #[test]
    fn test_closure_is_a_source() {
        let mut src = |c: DrawContext<'_>| if c.wave_id == "w" { 0.25 } else { 0.75 };
        assert_eq!(RandomSource::next(&mut src, ctx(0)), 0.25);
    }

    #[test]
    fn test_thread_rng_in_range() {
        let mut s = ThreadRngSource;
        for i in 0..1000 {
            let v = s.next(ctx(i));
            assert!((0.0..1.0).contains(&v));
        }
    }
}
