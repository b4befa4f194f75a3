//! The external reward-program scoring formula (`spec.md` §4.4).
//!
//! Pure functions only — no gateway calls, no domain mutation. Consumed by
//! both the Quote Engine (to budget per-market capital) and the Market
//! Scanner (to rank candidates by expected reward share).

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::core::domain::{BookSnapshot, Price, PriceLevel};

/// `c` in the `Q_min` interior-regime formula (`spec.md` §4.4).
pub const Q_MIN_INTERIOR_DIVISOR: f64 = 3.0;

/// `TWO_SIDED_BOOST` applied to scanner ranking (`spec.md` §4.2 step 3).
pub const TWO_SIDED_BOOST: f64 = 3.0;

/// Per-order reward score `S(v, s, b) = ((v - s) / v)^2 * b`.
///
/// Zero outside `0 <= s < v`.
#[must_use]
pub fn order_score(max_spread: f64, distance_from_mid: f64, size: f64) -> f64 {
    if max_spread <= 0.0 || distance_from_mid < 0.0 || distance_from_mid >= max_spread {
        return 0.0;
    }
    let ratio = (max_spread - distance_from_mid) / max_spread;
    ratio * ratio * size
}

fn to_f64(d: Price) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Sum `order_score` over every level within `max_spread` of `midpoint`.
#[must_use]
pub fn sum_levels_score(levels: &[PriceLevel], midpoint: Price, max_spread: Price) -> f64 {
    let midpoint = to_f64(midpoint);
    let max_spread = to_f64(max_spread);
    levels
        .iter()
        .map(|level| {
            let distance = (to_f64(level.price()) - midpoint).abs();
            order_score(max_spread, distance, to_f64(level.size()))
        })
        .sum()
}

/// `Q_min` for a market with complementary books `own` and `complement`
/// (`spec.md` §4.4).
///
/// - `Q1 := sum(bids on own) + sum(asks on complement)`
/// - `Q2 := sum(asks on own) + sum(bids on complement)`
/// - Interior regime (`midpoint in [0.10, 0.90]`): `max(min(Q1,Q2), max(Q1/c, Q2/c))`.
/// - Extreme regime: `min(Q1, Q2)` — single-sided pays nothing.
#[must_use]
pub fn q_min(own: &BookSnapshot, complement: &BookSnapshot, max_spread: Price) -> f64 {
    let q1 = sum_levels_score(own.bids(), own.midpoint(), max_spread)
        + sum_levels_score(complement.asks(), complement.midpoint(), max_spread);
    let q2 = sum_levels_score(own.asks(), own.midpoint(), max_spread)
        + sum_levels_score(complement.bids(), complement.midpoint(), max_spread);

    let mid = to_f64(own.midpoint());
    if (0.10..=0.90).contains(&mid) {
        let min_q = q1.min(q2);
        let boosted = (q1 / Q_MIN_INTERIOR_DIVISOR).max(q2 / Q_MIN_INTERIOR_DIVISOR);
        min_q.max(boosted)
    } else {
        q1.min(q2)
    }
}

/// Estimated share of `daily_rate` for a market, given this bot's own
/// `Q_min` and the book's total scoring-weighted competition
/// (`spec.md` §4.4: an order-of-magnitude ranking/reporting estimate only).
#[must_use]
pub fn estimate_share(q_min_own: f64, competition_usdc: f64, daily_rate: Price) -> Price {
    let denom = q_min_own + 0.5 * competition_usdc + 50.0;
    if denom <= 0.0 {
        return Price::ZERO;
    }
    let fraction = q_min_own / denom;
    daily_rate * Price::from_f64(fraction).unwrap_or(Price::ZERO)
}

/// `score = (daily_rate * TWO_SIDED_BOOST * sqrt(max_spread/0.03)) /
/// (competition + 50) / (required_capital + 1)` (`spec.md` §4.2 step 3).
#[must_use]
pub fn scanner_score(daily_rate: f64, max_spread: f64, competition: f64, required_capital: f64) -> f64 {
    let numerator = daily_rate * TWO_SIDED_BOOST * (max_spread / 0.03).max(0.0).sqrt();
    numerator / (competition + 50.0) / (required_capital + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use rust_decimal_macros::dec;

    #[test]
    fn order_score_is_zero_outside_band() {
        assert_eq!(order_score(0.05, 0.05, 100.0), 0.0);
        assert_eq!(order_score(0.05, 0.06, 100.0), 0.0);
        assert_eq!(order_score(0.0, 0.0, 100.0), 0.0);
    }

    #[test]
    fn order_score_peaks_at_midpoint() {
        let at_mid = order_score(0.05, 0.0, 100.0);
        let near_edge = order_score(0.05, 0.04, 100.0);
        assert!(at_mid > near_edge);
        assert!((at_mid - 100.0).abs() < 1e-9);
    }

    fn now() -> DateTime<chrono::Utc> {
        DateTime::from_timestamp(0, 0).unwrap()
    }

    #[test]
    fn q_min_interior_regime_uses_max_of_min_and_boosted() {
        let own = BookSnapshot::try_new(
            dec!(0.5),
            dec!(0.45),
            dec!(0.55),
            vec![PriceLevel::new(dec!(0.48), dec!(100))],
            vec![],
            now(),
        )
        .unwrap();
        let complement = BookSnapshot::try_new(dec!(0.5), dec!(0.45), dec!(0.55), vec![], vec![], now()).unwrap();
        let q = q_min(&own, &complement, dec!(0.05));
        assert!(q > 0.0);
    }

    #[test]
    fn q_min_extreme_regime_is_min_not_boosted() {
        let own = BookSnapshot::try_new(
            dec!(0.95),
            dec!(0.90),
            dec!(0.99),
            vec![PriceLevel::new(dec!(0.92), dec!(100))],
            vec![],
            now(),
        )
        .unwrap();
        let complement = BookSnapshot::try_new(dec!(0.05), dec!(0.01), dec!(0.10), vec![], vec![], now()).unwrap();
        let q = q_min(&own, &complement, dec!(0.05));
        let q1 = sum_levels_score(own.bids(), own.midpoint(), dec!(0.05))
            + sum_levels_score(complement.asks(), complement.midpoint(), dec!(0.05));
        let q2 = sum_levels_score(own.asks(), own.midpoint(), dec!(0.05))
            + sum_levels_score(complement.bids(), complement.midpoint(), dec!(0.05));
        assert!((q - q1.min(q2)).abs() < 1e-9);
    }

    #[test]
    fn estimate_share_scales_with_q_min() {
        let low = estimate_share(10.0, 1000.0, dec!(30));
        let high = estimate_share(500.0, 1000.0, dec!(30));
        assert!(high > low);
    }

    #[test]
    fn estimate_share_zero_when_denom_nonpositive() {
        assert_eq!(estimate_share(0.0, 0.0, dec!(30)), Price::ZERO);
    }

    #[test]
    fn scanner_score_rewards_higher_rate_and_spread() {
        let base = scanner_score(30.0, 0.03, 100.0, 50.0);
        let richer = scanner_score(60.0, 0.03, 100.0, 50.0);
        let wider = scanner_score(30.0, 0.06, 100.0, 50.0);
        assert!(richer > base);
        assert!(wider > base);
    }
}
