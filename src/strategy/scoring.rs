//! Source scoring.
//!
//! Ranks yield sources by a weighted blend of rate, size and stability:
//!
//! ```text
//! score = 0.6 · rate
//!       + 0.3 · min(volume / 1_000_000, 10)
//!       + 0.1 · (15 − |rate − 10|)
//! ```
//!
//! The size term saturates so very large venues stop gaining preference,
//! and the stability term penalizes rates far from a 10% anchor in either
//! direction.

use rust_decimal::prelude::*;
use tracing::debug;

use crate::types::{MorphError, Source};

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

const RATE_WEIGHT: f64 = 0.6;
const SIZE_WEIGHT: f64 = 0.3;
const STABILITY_WEIGHT: f64 = 0.1;

/// Volume unit for the size term.
const VOLUME_UNIT: f64 = 1_000_000.0;
/// Size term saturates at this many volume units.
const SIZE_CAP: f64 = 10.0;
/// Rate considered "stable".
const STABLE_RATE: f64 = 10.0;
const STABILITY_BASE: f64 = 15.0;

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Score a single source. Pure function of its public fields.
pub fn score(source: &Source) -> f64 {
    let rate = source.rate.to_f64().unwrap_or(0.0);
    let volume = source.volume.to_f64().unwrap_or(0.0);

    let rate_term = rate * RATE_WEIGHT;
    let size_term = (volume / VOLUME_UNIT).min(SIZE_CAP) * SIZE_WEIGHT;
    let stability_term = (STABILITY_BASE - (rate - STABLE_RATE).abs()) * STABILITY_WEIGHT;

    rate_term + size_term + stability_term
}

/// Pick the best-scoring active source.
///
/// Only a strictly greater score displaces the current best, so exact ties
/// resolve to whichever source the iterator yields first. The ledger keeps
/// sources in configuration order, so that order decides ties.
pub fn select_optimal<'a, I>(sources: I) -> Result<&'a Source, MorphError>
where
    I: IntoIterator<Item = &'a Source>,
{
    let mut best: Option<(&Source, f64)> = None;

    for source in sources.into_iter().filter(|s| s.active) {
        let s = score(source);
        match best {
            Some((_, best_score)) if s <= best_score => {}
            _ => best = Some((source, s)),
        }
    }

    match best {
        Some((source, s)) => {
            debug!(source_id = %source.id, score = s, "Optimal source selected");
            Ok(source)
        }
        None => Err(MorphError::NoActiveSource),
    }
}

/// Active sources with their scores, best first.
pub fn rank<'a, I>(sources: I) -> Vec<(&'a Source, f64)>
where
    I: IntoIterator<Item = &'a Source>,
{
    let mut ranked: Vec<(&Source, f64)> = sources
        .into_iter()
        .filter(|s| s.active)
        .map(|s| (s, score(s)))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
