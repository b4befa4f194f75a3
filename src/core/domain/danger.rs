//! Pre-computed per-token cancel threshold.

use super::id::ConditionId;
use super::money::Price;

/// Pre-computed per-token cancel threshold.
///
/// Maintained as a `TokenId -> DangerTrigger` map, rebuilt whenever a market
/// transitions into or out of `Quoting`, or on refresh (`spec.md` §3, §4.6).
/// The hot feed path performs one map lookup and one comparison against
/// `cancel_below_mid` — it never walks the market or order set.
#[derive(Debug, Clone, PartialEq)]
pub struct DangerTrigger {
    cancel_below_mid: Price,
    condition_id: ConditionId,
}

impl DangerTrigger {
    #[must_use]
    pub const fn new(cancel_below_mid: Price, condition_id: ConditionId) -> Self {
        Self {
            cancel_below_mid,
            condition_id,
        }
    }

    #[must_use]
    pub const fn cancel_below_mid(&self) -> Price {
        self.cancel_below_mid
    }

    #[must_use]
    pub const fn condition_id(&self) -> &ConditionId {
        &self.condition_id
    }

    /// `true` when `mid` has drifted down to or below the trigger — the
    /// cooldown-entry condition (`spec.md` §4.6).
    #[must_use]
    pub fn fires(&self, mid: Price) -> bool {
        mid <= self.cancel_below_mid
    }

    /// Combine with another trigger on the same token, keeping the most
    /// conservative (maximum) threshold across multiple live orders
    /// (`spec.md` §4.6: `update_danger_triggers`).
    #[must_use]
    pub fn most_conservative(self, other: Self) -> Self {
        if other.cancel_below_mid > self.cancel_below_mid {
            other
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fires_when_mid_at_or_below_threshold() {
        let t = DangerTrigger::new(dec!(0.55), ConditionId::new("c1"));
        assert!(t.fires(dec!(0.55)));
        assert!(t.fires(dec!(0.50)));
        assert!(!t.fires(dec!(0.56)));
    }

    #[test]
    fn most_conservative_keeps_higher_threshold() {
        let a = DangerTrigger::new(dec!(0.5), ConditionId::new("c1"));
        let b = DangerTrigger::new(dec!(0.6), ConditionId::new("c1"));
        assert_eq!(a.clone().most_conservative(b.clone()).cancel_below_mid(), dec!(0.6));
        assert_eq!(b.most_conservative(a).cancel_below_mid(), dec!(0.6));
    }

    #[test]
    fn condition_id_is_retained() {
        let t = DangerTrigger::new(dec!(0.5), ConditionId::new("c1"));
        assert_eq!(t.condition_id(), &ConditionId::new("c1"));
    }
}
