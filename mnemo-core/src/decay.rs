//! Time-based score multipliers: temporal decay and access weighting.
//!
//! Temporal decay is piecewise linear through fixed knots and asymptotic
//! beyond one year:
//!
//! | age (days) | multiplier |
//! |------------|------------|
//! | 0–7        | 1.0        |
//! | 7–30       | 1.0 → 0.7  |
//! | 30–90      | 0.7 → 0.4  |
//! | 90–365     | 0.4 → 0.2  |
//! | > 365      | 0.05 + 0.15·e^(−0.3·(years − 1)) |
//!
//! The tail meets the last knot at exactly 0.2 and never reaches 0.05, so
//! old memories stay searchable.

use chrono::{DateTime, Utc};

use crate::types::days_between;

/// Lower bound of [`temporal_decay`].
pub const DECAY_FLOOR: f64 = 0.05;

/// `(age_days, multiplier)` knots of the linear segment.
const DECAY_KNOTS: [(f64, f64); 5] = [(0.0, 1.0), (7.0, 1.0), (30.0, 0.7), (90.0, 0.4), (365.0, 0.2)];

/// Tail rate per year past the first.
const TAIL_RATE: f64 = 0.3;

/// Days since last access before recency starts to cost.
const RECENCY_GRACE_DAYS: f64 = 90.0;
/// Days over which recency falls from 1.0 to its floor.
const RECENCY_SPAN_DAYS: f64 = 275.0;
/// Recency multiplier floor.
const RECENCY_FLOOR: f64 = 0.7;
/// Access-count boost cap.
const ACCESS_BOOST_CAP: f64 = 1.5;

/// Temporal decay multiplier for a memory created at `created_at`.
///
/// Returns a value in `[0.05, 1.0]`, non-increasing in age. A creation time
/// in the future counts as age zero.
#[must_use]
pub fn temporal_decay(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    decay_for_age(days_between(created_at, now))
}

/// [`temporal_decay`] for an age given in fractional days.
#[must_use]
pub fn decay_for_age(age_days: f64) -> f64 {
    if age_days.is_nan() || age_days <= 0.0 {
        return 1.0;
    }
    if age_days.is_infinite() {
        return DECAY_FLOOR;
    }

    for pair in DECAY_KNOTS.windows(2) {
        let (a, va) = pair[0];
        let (b, vb) = pair[1];
        if age_days <= b {
            return va + (vb - va) * (age_days - a) / (b - a);
        }
    }

    let (last_day, last_value) = DECAY_KNOTS[DECAY_KNOTS.len() - 1];
    let years_past = (age_days - last_day) / 365.0;
    DECAY_FLOOR + (last_value - DECAY_FLOOR) * (-TAIL_RATE * years_past).exp()
}

/// Access-count boost: `1 + log10(count) / 2`, capped at 1.5.
#[must_use]
pub fn access_boost(access_count: u32) -> f64 {
    let count = f64::from(access_count.max(1));
    (1.0 + count.log10() / 2.0).min(ACCESS_BOOST_CAP)
}

/// Recency multiplier: 1.0 within 90 days of the last access, then linear
/// down to 0.7 at 365 days.
#[must_use]
pub fn recency_boost(days_since_access: f64) -> f64 {
    if days_since_access <= RECENCY_GRACE_DAYS {
        return 1.0;
    }
    let fall = (days_since_access - RECENCY_GRACE_DAYS) / RECENCY_SPAN_DAYS * (1.0 - RECENCY_FLOOR);
    (1.0 - fall).max(RECENCY_FLOOR)
}

/// Combined access weight in `[0.7, 1.5]`.
#[must_use]
pub fn access_weight(access_count: u32, last_accessed: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    access_boost(access_count) * recency_boost(days_between(last_accessed, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn decay_knots() {
        assert!(approx(decay_for_age(0.0), 1.0));
        assert!(approx(decay_for_age(7.0), 1.0));
        assert!(approx(decay_for_age(30.0), 0.7));
        assert!(approx(decay_for_age(90.0), 0.4));
        assert!(approx(decay_for_age(365.0), 0.2));
        assert!(approx(decay_for_age(60.0), 0.55));
    }

    #[test]
    fn decay_tail_is_continuous_and_floored() {
        assert!((decay_for_age(365.001) - 0.2).abs() < 1e-5);
        assert!(decay_for_age(400.0) < 0.2);
        assert!(decay_for_age(365.0 * 50.0) > DECAY_FLOOR);
        assert!(approx(decay_for_age(f64::INFINITY), DECAY_FLOOR));
    }

    #[test]
    fn future_timestamps_do_not_decay() {
        let now = Utc::now();
        assert!(approx(temporal_decay(now + Duration::days(3), now), 1.0));
        assert!(approx(decay_for_age(-5.0), 1.0));
    }

    #[test]
    fn access_boost_is_logarithmic_and_capped() {
        assert!(approx(access_boost(0), 1.0));
        assert!(approx(access_boost(1), 1.0));
        assert!(approx(access_boost(10), 1.5));
        assert!(approx(access_boost(10_000), 1.5));
        assert!(access_boost(5) > access_boost(2));
    }

    #[test]
    fn recency_penalises_stale_access() {
        let now = Utc::now();
        assert!(approx(access_weight(1, now - Duration::days(80), now), 1.0));
        assert!(approx(access_weight(1, now - Duration::days(365), now), 0.7));
        assert!(approx(access_weight(1, now - Duration::days(2000), now), 0.7));
        let mid = access_weight(1, now - Duration::days(200), now);
        assert!(mid < 1.0 && mid > 0.7);
    }
}
