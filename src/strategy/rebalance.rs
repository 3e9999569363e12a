//! Reallocation with hysteresis.
//!
//! A position only moves to the optimal source when that source's rate
//! beats the position's current rate by strictly more than the threshold.
//! Small scoring noise therefore never causes churn between venues.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::types::{Position, Source};

/// Hysteresis rule for moving positions.
#[derive(Debug, Clone)]
pub struct ReallocationPolicy {
    /// Required rate improvement in percentage points.
    pub threshold: Decimal,
}

impl Default for ReallocationPolicy {
    fn default() -> Self {
        Self { threshold: dec!(2) }
    }
}

impl ReallocationPolicy {
    pub fn new(threshold: Decimal) -> Self {
        Self { threshold }
    }

    /// Whether `position` should move to `optimal`.
    pub fn should_move(&self, position: &Position, optimal: &Source) -> bool {
        position.source_id != optimal.id && optimal.rate - position.current_rate > self.threshold
    }

    /// Rebind `position` to `optimal` if the hysteresis rule allows it.
    ///
    /// Does not accrue; callers accrue first so reward up to now is locked
    /// in at the old rate. `start_rate` is left untouched.
    pub fn reallocate(&self, position: &mut Position, optimal: &Source) -> bool {
        if !self.should_move(position, optimal) {
            return false;
        }

        debug!(
            position_id = %position.id,
            from = %position.source_id,
            to = %optimal.id,
            old_rate = %position.current_rate,
            new_rate = %optimal.rate,
            "Reallocating position"
        );
        position.source_id = optimal.id.clone();
        position.current_rate = optimal.rate;
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn position_on(source: &Source) -> Position {
        Position::open("u1", source, dec!(5), Utc::now())
    }

    #[test]
    fn test_exactly_threshold_does_not_move() {
        let current = Source::new("a", "A", dec!(10));
        let optimal = Source::new("b", "B", dec!(12.0));
        let mut p = position_on(&current);
        assert!(!ReallocationPolicy::default().reallocate(&mut p, &optimal));
        assert_eq!(p.source_id, "a");
        assert_eq!(p.current_rate, dec!(10));
    }

    #[test]
    fn test_just_above_threshold_moves() {
        let current = Source::new("a", "A", dec!(10));
        let optimal = Source::new("b", "B", dec!(12.01));
        let mut p = position_on(&current);
        assert!(ReallocationPolicy::default().reallocate(&mut p, &optimal));
        assert_eq!(p.source_id, "b");
        assert_eq!(p.current_rate, dec!(12.01));
        assert_eq!(p.start_rate, dec!(10));
    }

    #[test]
    fn test_same_source_never_moves() {
        let current = Source::new("a", "A", dec!(10));
        let mut p = position_on(&current);
        // Source rate drifted far above the position's recorded rate
        let drifted = Source::new("a", "A", dec!(19));
        assert!(!ReallocationPolicy::default().reallocate(&mut p, &drifted));
    }

    #[test]
    fn test_small_score_gap_does_not_move() {
        // Scores 8.5 (rate 12) and 9.0 (rate 13): rate gap 1 is within threshold
        let current = Source::new("a", "A", dec!(12));
        let optimal = Source::new("b", "B", dec!(13));
        let mut p = position_on(&current);
        assert!(!ReallocationPolicy::default().reallocate(&mut p, &optimal));
    }

    #[test]
    fn test_lower_rate_never_moves() {
        let current = Source::new("a", "A", dec!(15));
        let optimal = Source::new("b", "B", dec!(6));
        let mut p = position_on(&current);
        assert!(!ReallocationPolicy::default().reallocate(&mut p, &optimal));
    }

    #[test]
    fn test_custom_threshold() {
        let current = Source::new("a", "A", dec!(10));
        let optimal = Source::new("b", "B", dec!(10.6));
        let p = position_on(&current);
        assert!(ReallocationPolicy::new(dec!(0.5)).should_move(&p, &optimal));
        assert!(!ReallocationPolicy::new(dec!(0.6)).should_move(&p, &optimal));
    }
}
