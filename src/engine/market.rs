//! Market simulation — bounded random drift of source rates.
//!
//! Each cycle every source's rate moves by a uniform step in
//! `[-step, +step]` and is clamped to `[floor, ceiling]`.

use rand::Rng;
use rust_decimal::prelude::*;
use tracing::debug;

use crate::config::LedgerConfig;
use crate::types::Source;

/// Drift parameters.
#[derive(Debug, Clone)]
pub struct RateDrift {
    pub step: Decimal,
    pub floor: Decimal,
    pub ceiling: Decimal,
}

impl From<&LedgerConfig> for RateDrift {
    fn from(cfg: &LedgerConfig) -> Self {
        Self {
            step: cfg.drift_step,
            floor: cfg.rate_floor,
            ceiling: cfg.rate_ceiling,
        }
    }
}

impl RateDrift {
    /// Clamp a rate into the configured band.
    pub fn clamp(&self, rate: Decimal) -> Decimal {
        rate.clamp(self.floor, self.ceiling)
    }

    /// One random step from `rate`, clamped.
    pub fn perturb<R: Rng + ?Sized>(&self, rate: Decimal, rng: &mut R) -> Decimal {
        let step = self.step.to_f64().unwrap_or(0.0);
        if step <= 0.0 {
            return self.clamp(rate);
        }
        let variance = rng.gen_range(-step..=step);
        let delta = Decimal::from_f64(variance)
            .unwrap_or(Decimal::ZERO)
            .round_dp(4);
        self.clamp(rate + delta)
    }

    /// Drift every source in place. Returns how many rates changed.
    pub fn apply<R: Rng + ?Sized>(&self, sources: &mut [Source], rng: &mut R) -> usize {
        let mut changed = 0;
        for source in sources.iter_mut() {
            let next = self.perturb(source.rate, rng);
            if next != source.rate {
                debug!(source_id = %source.id, from = %source.rate, to = %next, "Rate drift");
                source.rate = next;
                changed += 1;
            }
        }
        changed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
