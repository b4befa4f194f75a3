//! Danger-Zone Detector: pre-computed per-token cancel thresholds so the
//! real-time feed's hot path is one map lookup and one comparison
//! (`spec.md` §4.6).

use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::core::domain::{ConditionId, DangerTrigger, Market, Price, TokenId, TrackedOrder};

/// Ratio of `max_spread` used to derive the cancel threshold. Constrained
/// to `[0.05, 0.8]`; configuration must enforce `spread_ratio >
/// danger_spread_ratio` (`spec.md` §4.6 invariant).
pub type DangerSpreadRatio = Decimal;

/// Default danger-spread ratio (`spec.md` §4.6: "typically 0.55").
pub const DEFAULT_DANGER_SPREAD_RATIO: DangerSpreadRatio = dec!(0.55);

/// `TokenId -> DangerTrigger` map, read on the feed hot path and written
/// from the tick handler (`spec.md` §5: shared-resource policy).
#[derive(Debug, Default)]
pub struct DangerTriggerMap {
    triggers: DashMap<TokenId, DangerTrigger>,
}

impl DangerTriggerMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// O(1) hot-path lookup: does `mid` fire the trigger for `token`?
    #[must_use]
    pub fn check(&self, token: &TokenId, mid: Price) -> bool {
        self.triggers.get(token).is_some_and(|t| t.fires(mid))
    }

    #[must_use]
    pub fn get(&self, token: &TokenId) -> Option<DangerTrigger> {
        self.triggers.get(token).map(|t| t.clone())
    }

    /// Clear every trigger belonging to `market`'s tokens
    /// (`spec.md` §4.6: `clear_danger_triggers`).
    pub fn clear_market(&self, market: &Market) {
        for token in market.tokens() {
            self.triggers.remove(token.id());
        }
    }

    /// `update_danger_triggers`: clear this market's tokens, then for each
    /// live BUY order recompute its threshold, keeping the most
    /// conservative (maximum) value per token (`spec.md` §4.6).
    pub fn update_for_market(
        &self,
        market: &Market,
        live_orders: &[TrackedOrder],
        danger_spread_ratio: DangerSpreadRatio,
    ) {
        self.clear_market(market);
        let max_spread = market.max_spread();
        let danger_spread = max_spread * danger_spread_ratio;

        for order in live_orders {
            if !order.is_live() || order.side() != crate::core::domain::Side::Buy {
                continue;
            }
            if order.condition_id() != market.condition_id() {
                continue;
            }
            let threshold = cancel_below_mid(order.price(), danger_spread);
            let candidate = DangerTrigger::new(threshold, market.condition_id().clone());
            self.triggers
                .entry(order.token_id().clone())
                .and_modify(|existing| *existing = existing.clone().most_conservative(candidate.clone()))
                .or_insert(candidate);
        }
    }

    /// REST fallback check for a quoting market's token: fires
    /// conservatively when a trigger is missing but orders are live, or
    /// when no midpoint is available (`spec.md` §4.6).
    #[must_use]
    pub fn rest_fallback_fires(&self, token: &TokenId, has_live_order: bool, mid: Option<Price>) -> bool {
        match (self.get(token), mid) {
            (Some(trigger), Some(mid)) => trigger.fires(mid),
            (None, _) if has_live_order => true,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// `cancel_below_mid := p + danger_spread` (`spec.md` §4.6).
#[must_use]
pub fn cancel_below_mid(order_price: Price, danger_spread: Price) -> Price {
    order_price + danger_spread
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{Side, Token};
    use chrono::DateTime;

    fn market() -> Market {
        Market::new(
            ConditionId::new("c1"),
            "q",
            Token::new(TokenId::new("yes"), "Yes", TokenId::new("no")),
            Token::new(TokenId::new("no"), "No", TokenId::new("yes")),
            dec!(0.05),
            dec!(100),
            dec!(30),
            dec!(0.01),
            false,
            1.0,
        )
    }

    fn buy_order(price: Decimal) -> TrackedOrder {
        TrackedOrder::new(
            crate::core::domain::OrderId::new("o1"),
            TokenId::new("yes"),
            ConditionId::new("c1"),
            Side::Buy,
            price,
            dec!(100),
            DateTime::from_timestamp(0, 0).unwrap(),
            0,
            true,
        )
    }

    #[test]
    fn cancel_below_mid_adds_danger_spread() {
        assert_eq!(cancel_below_mid(dec!(0.5), dec!(0.02)), dec!(0.52));
    }

    #[test]
    fn update_for_market_sets_threshold_from_live_buy_orders() {
        let map = DangerTriggerMap::new();
        let orders = vec![buy_order(dec!(0.5))];
        map.update_for_market(&market(), &orders, dec!(0.55));
        let threshold = dec!(0.5) + dec!(0.05) * dec!(0.55);
        assert!(map.check(&TokenId::new("yes"), threshold));
        assert!(!map.check(&TokenId::new("yes"), threshold + dec!(0.01)));
    }

    #[test]
    fn update_for_market_keeps_most_conservative_threshold() {
        let map = DangerTriggerMap::new();
        let orders = vec![buy_order(dec!(0.4)), buy_order(dec!(0.45))];
        map.update_for_market(&market(), &orders, dec!(0.55));
        let higher_threshold = dec!(0.45) + dec!(0.05) * dec!(0.55);
        let lower_threshold = dec!(0.4) + dec!(0.05) * dec!(0.55);
        assert!(map.check(&TokenId::new("yes"), higher_threshold));
        assert!(!map.check(&TokenId::new("yes"), lower_threshold - dec!(0.001)));
    }

    #[test]
    fn clear_market_removes_both_token_triggers() {
        let map = DangerTriggerMap::new();
        map.update_for_market(&market(), &[buy_order(dec!(0.5))], dec!(0.55));
        map.clear_market(&market());
        assert!(map.get(&TokenId::new("yes")).is_none());
    }

    #[test]
    fn rest_fallback_fires_conservatively_without_trigger() {
        let map = DangerTriggerMap::new();
        assert!(map.rest_fallback_fires(&TokenId::new("yes"), true, Some(dec!(0.5))));
        assert!(!map.rest_fallback_fires(&TokenId::new("yes"), false, Some(dec!(0.5))));
    }

    #[test]
    fn rest_fallback_fires_when_midpoint_missing() {
        let map = DangerTriggerMap::new();
        map.update_for_market(&market(), &[buy_order(dec!(0.5))], dec!(0.55));
        assert!(map.rest_fallback_fires(&TokenId::new("yes"), true, None));
    }
}
