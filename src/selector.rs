//! # Stage: Recipe Selector
//!
//! ## Responsibility
//! Map one draw in `[0, 1)` to a recipe. Pure: no state, no I/O.
//!
//! - **Uniform** (no recipe rates): `[0, 1)` is cut into `n` equal buckets in
//!   declaration order; `index = floor(draw / (1 / n))`.
//! - **Weighted** (every recipe has a rate): recipes sorted ascending by rate
//!   (ties keep declaration order), first whose running sum is `>= draw` wins.
//!
//! ## Guarantees
//! - Total: any finite draw, including exactly `1.0`, selects some recipe
//! - Boundary draws belong to the lower bucket in weighted mode

use crate::validate::{Recipe, RecipeSet};

/// Selection mode of a recipe set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Uniform,
    Weighted,
}

pub fn mode_of(recipes: &RecipeSet) -> SelectionMode {
    if recipes.is_weighted() { SelectionMode::Weighted } else { SelectionMode::Uniform }
}

/// Choose a recipe for `draw`.
pub fn select(recipes: &RecipeSet, draw: f64) -> &Recipe {
    match mode_of(recipes) {
        SelectionMode::Uniform => select_uniform(recipes.as_slice(), draw),
        SelectionMode::Weighted => select_weighted(recipes.as_slice(), draw),
    }
}

/// Equal partitions in declaration order.
///
/// # Panics
/// If `recipes` is empty; a validated [`RecipeSet`] never is.
pub fn select_uniform(recipes: &[Recipe], draw: f64) -> &Recipe {
    let n = recipes.len();
    let partition = 1.0 / n as f64;
    let index = (draw.max(0.0) / partition).floor() as usize;
    &recipes[index.min(n - 1)]
}

/// Cumulative sum over recipes sorted ascending by rate.
///
/// # Panics
/// If `recipes` is empty; a validated [`RecipeSet`] never is.
pub fn select_weighted(recipes: &[Recipe], draw: f64) -> &Recipe {
    let mut ordered: Vec<&Recipe> = recipes.iter().collect();
    // Stable sort: equal rates stay in declaration order.
    ordered.sort_by(|a, b| {
        let (a, b) = (a.sample_rate.unwrap_or(0.0), b.sample_rate.unwrap_or(0.0));
        a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut cumulative = 0.0;
    for recipe in ordered.iter().copied() {
        cumulative += recipe.sample_rate.unwrap_or(0.0);
        if cumulative >= draw {
            return recipe;
        }
    }
    ordered[ordered.len() - 1]
}
