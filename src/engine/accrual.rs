//! Accrual — time-proportional reward on a position's principal.
//!
//! Reward for an interval is simple (not compounded within the interval):
//!
//! ```text
//! delta = principal · (rate / 100) · (elapsed_hours / 8760)
//! ```
//!
//! The delta is folded back into principal, so successive accruals compound
//! at the granularity the caller chooses (per cycle, or lazily on read).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use crate::types::Position;

/// Hours in a 365-day year.
pub const HOURS_PER_YEAR: Decimal = dec!(8760);
const MILLIS_PER_HOUR: Decimal = dec!(3600000);
/// Rewards are rounded to this many decimal places so every ledger sum
/// stays within `Decimal` precision and is exact.
pub const REWARD_SCALE: u32 = 12;

/// Hours between two instants, at millisecond resolution.
/// Zero when `to` is not after `from`.
pub fn elapsed_hours(from: DateTime<Utc>, to: DateTime<Utc>) -> Decimal {
    let millis = (to - from).num_milliseconds();
    if millis <= 0 {
        Decimal::ZERO
    } else {
        Decimal::from(millis) / MILLIS_PER_HOUR
    }
}

/// Advance `position` to `now` and return the reward added.
///
/// Calling twice with the same `now` adds nothing the second time. A `now`
/// earlier than the last accrual (clock skew) leaves the position untouched.
pub fn accrue(position: &mut Position, now: DateTime<Utc>) -> Decimal {
    if now < position.last_accrual {
        warn!(
            position_id = %position.id,
            last_accrual = %position.last_accrual,
            now = %now,
            "Clock moved backwards, skipping accrual"
        );
        return Decimal::ZERO;
    }

    let hours = elapsed_hours(position.last_accrual, now);
    if hours.is_zero() {
        return Decimal::ZERO;
    }

    let delta = (position.principal * position.current_rate * hours
        / (Decimal::ONE_HUNDRED * HOURS_PER_YEAR))
        .round_dp(REWARD_SCALE)
        .max(Decimal::ZERO);

    position.principal += delta;
    position.earned += delta;
    position.shares = position.principal;
    position.last_accrual = now;
    delta
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
