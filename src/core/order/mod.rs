//! Order Manager: reconciles intended quotes against live orders, cancels
//! stale orders, places new ones, and detects fills by three-source
//! verification (`spec.md` §4.5).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use crate::core::domain::{
    order::OrderType, ConditionId, Market, OrderId, OrderSpec, Shares, Side, TokenId, TrackedOrder,
};
use crate::core::exchange::{ExchangeGateway, GatewayError, RemotePosition, RemoteTrade};

/// Price tolerance for matching a live order to a target, expressed as a
/// multiple of tick size (`spec.md` §4.5 step 2: "1.5 x tick").
pub const MATCH_TOLERANCE_TICKS: Decimal = dec!(1.5);

/// GTD lifetime requested for BUY placements; the exchange enforces a 60s
/// security buffer, so the effective resting time is ~5 minutes
/// (`spec.md` §4.5 step 4).
pub const BUY_GTD_SECONDS: i64 = 360;

/// Bounded fill-dedup window (`spec.md` §4.5, §5): keep at most this many
/// keys, pruning to half on overflow.
pub const FILL_DEDUP_CAP: usize = 100;
const FILL_DEDUP_PRUNE_TO: usize = 50;

/// Key used to deduplicate a fill observed through more than one source.
pub type FillDedupKey = (OrderId, Shares);

/// Bounded LRU-ish set of recently processed fill-dedup keys
/// (`spec.md` §4.5, §5).
#[derive(Debug, Default)]
pub struct FillDedup {
    seen: VecDeque<FillDedupKey>,
}

impl FillDedup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `key` was not seen before, recording it. Returns
    /// `false` (and does not re-record) on a duplicate.
    pub fn observe(&mut self, key: FillDedupKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.seen.len() >= FILL_DEDUP_CAP {
            while self.seen.len() > FILL_DEDUP_PRUNE_TO {
                self.seen.pop_front();
            }
        }
        self.seen.push_back(key);
        true
    }
}

/// A confirmed fill ready for the engine's fill-dispatch entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFill {
    pub order: TrackedOrder,
    pub fill_size: Shares,
}

/// `refresh_market_orders(market, targets)`: matches live orders to targets,
/// cancels the unmatched live set, places the unmatched targets.
///
/// Returns the full live-order set to keep tracking (kept-live, unchanged,
/// plus a freshly constructed [`TrackedOrder`] for each new placement) and
/// the count of new placements.
pub async fn refresh_market_orders(
    gateway: &dyn ExchangeGateway,
    market: &Market,
    live_orders: &[TrackedOrder],
    targets: &[OrderSpec],
    now: DateTime<Utc>,
) -> (Vec<TrackedOrder>, usize) {
    let tolerance = market.tick_size() * MATCH_TOLERANCE_TICKS;

    let mut unmatched_targets: Vec<&OrderSpec> = targets.iter().collect();
    let mut kept = Vec::new();
    let mut to_cancel = Vec::new();

    for order in live_orders {
        if !order.is_live() {
            continue;
        }
        let matched_index = unmatched_targets
            .iter()
            .position(|target| order.matches_target(target, tolerance));
        match matched_index {
            Some(idx) => {
                unmatched_targets.remove(idx);
                kept.push(order.clone());
            }
            None => to_cancel.push(order.order_id().clone()),
        }
    }

    if !to_cancel.is_empty() {
        if let Err(e) = gateway.cancel_orders(&to_cancel).await {
            warn!(error = %e, condition = %market.condition_id(), "failed to cancel stale orders");
        }
    }

    let mut placed = 0usize;
    for target in unmatched_targets {
        if let Some(order_id) = place_order(gateway, target, now).await {
            kept.push(TrackedOrder::new(
                order_id,
                target.token_id.clone(),
                target.condition_id.clone(),
                target.side,
                target.price,
                target.size,
                now,
                target.level,
                target.scoring,
            ));
            placed += 1;
        }
    }

    (kept, placed)
}

/// Place a single target order, stamping the correct `order_type` per side
/// (`spec.md` §4.5 step 4). Routine rejections (`post_only_rejected`,
/// `insufficient_balance`) are logged and swallowed; anything else is the
/// caller's responsibility to count as an engine error.
pub async fn place_order(
    gateway: &dyn ExchangeGateway,
    target: &OrderSpec,
    now: DateTime<Utc>,
) -> Option<OrderId> {
    let mut spec = target.clone();
    spec.order_type = match target.side {
        Side::Buy => OrderType::Gtd {
            expires_at_unix: now.timestamp() + BUY_GTD_SECONDS,
        },
        Side::Sell => OrderType::Gtc,
    };

    match gateway.create_and_post_order(&spec).await {
        Ok(ack) if ack.success => Some(ack.order_id),
        Ok(_) => None,
        Err(e) if e.is_routine_rejection() => {
            debug!(error = %e, token = %spec.token_id, "order placement routinely rejected");
            None
        }
        Err(e) => {
            warn!(error = %e, token = %spec.token_id, "order placement failed");
            None
        }
    }
}

/// Three-source fill reconciliation (`spec.md` §4.5 steps 1-6).
///
/// `on_chain_balance` supplies the current conditional-token balance for a
/// token, used only for orders left unresolved after the trade-matching
/// pass.
pub async fn detect_fills(
    gateway: &dyn ExchangeGateway,
    tracked_live: &[TrackedOrder],
    state_tracked_balance: impl Fn(&TokenId) -> Shares,
) -> Result<(Vec<DetectedFill>, Vec<OrderId>), GatewayError> {
    let authoritative = gateway.get_open_orders().await?;
    let authoritative_ids: std::collections::HashSet<_> =
        authoritative.iter().map(|o| o.order_id().clone()).collect();

    let disappeared: Vec<&TrackedOrder> = tracked_live
        .iter()
        .filter(|o| o.is_live() && !authoritative_ids.contains(o.order_id()))
        .collect();

    if disappeared.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let trades = gateway.get_trades(None).await?;

    let mut fills = Vec::new();
    let mut cancelled = Vec::new();
    let mut still_unmatched = Vec::new();

    for order in disappeared {
        if let Some(trade) = find_matching_trade(order, &trades) {
            fills.push(DetectedFill {
                order: order.clone(),
                fill_size: trade.size,
            });
        } else {
            still_unmatched.push(order);
        }
    }

    for order in still_unmatched {
        let tracked = state_tracked_balance(order.token_id());
        let expected_fill = order.original_size() - order.filled_size();
        match gateway.get_conditional_balance(order.token_id()).await {
            Ok(on_chain) => {
                let delta = (on_chain - tracked).abs();
                let confirmed = match order.side() {
                    Side::Buy => on_chain > tracked && delta >= expected_fill / dec!(2),
                    Side::Sell => on_chain < tracked && delta >= expected_fill / dec!(2),
                };
                if confirmed {
                    fills.push(DetectedFill {
                        order: order.clone(),
                        fill_size: delta,
                    });
                } else {
                    cancelled.push(order.order_id().clone());
                }
            }
            Err(e) => {
                warn!(error = %e, order = %order.order_id(), "on-chain balance check failed, marking cancelled");
                cancelled.push(order.order_id().clone());
            }
        }
    }

    for order in &authoritative {
        if let Some(tracked) = tracked_live.iter().find(|t| t.order_id() == order.order_id()) {
            let delta = order.filled_size() - tracked.filled_size();
            if delta > Shares::ZERO {
                fills.push(DetectedFill {
                    order: tracked.clone(),
                    fill_size: delta,
                });
            }
        }
    }

    Ok((fills, cancelled))
}

fn find_matching_trade<'a>(order: &TrackedOrder, trades: &'a [RemoteTrade]) -> Option<&'a RemoteTrade> {
    trades.iter().find(|t| {
        t.taker_order_id.as_deref() == Some(order.order_id().as_str())
            || t.maker_order_ids.iter().any(|id| id == order.order_id().as_str())
            || (t.token_id == *order.token_id()
                && t.side == order.side()
                && (t.price - order.price()).abs() <= dec!(0.01)
                && (t.size - (order.original_size() - order.filled_size())).abs() <= dec!(1))
    })
}

/// Locate a remote position's balance by token, defaulting to zero.
#[must_use]
pub fn remote_balance(positions: &[RemotePosition], token: &TokenId) -> Shares {
    positions
        .iter()
        .find(|p| &p.token_id == token)
        .map_or(Shares::ZERO, |p| p.shares)
}

/// Cancel every live order belonging to `condition`, logging failures
/// without panicking (used by the danger-zone detector and the
/// accidental-fill handler).
pub async fn cancel_market(gateway: &dyn ExchangeGateway, condition: &ConditionId) {
    if let Err(e) = gateway.cancel_market_orders(condition).await {
        warn!(error = %e, condition = %condition, "failed to cancel market orders");
    } else {
        info!(condition = %condition, "cancelled all orders for market");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_dedup_rejects_repeat_keys() {
        let mut dedup = FillDedup::new();
        let key = (OrderId::new("o1"), dec!(10));
        assert!(dedup.observe(key.clone()));
        assert!(!dedup.observe(key));
    }

    #[test]
    fn fill_dedup_prunes_on_overflow() {
        let mut dedup = FillDedup::new();
        for i in 0..FILL_DEDUP_CAP {
            dedup.observe((OrderId::new(format!("o{i}")), dec!(1)));
        }
        assert_eq!(dedup.seen.len(), FILL_DEDUP_CAP);
        dedup.observe((OrderId::new("overflow"), dec!(1)));
        assert!(dedup.seen.len() <= FILL_DEDUP_PRUNE_TO + 1);
    }

    #[test]
    fn remote_balance_defaults_to_zero() {
        let positions = vec![RemotePosition {
            token_id: TokenId::new("yes"),
            shares: dec!(42),
        }];
        assert_eq!(remote_balance(&positions, &TokenId::new("yes")), dec!(42));
        assert_eq!(remote_balance(&positions, &TokenId::new("no")), Shares::ZERO);
    }

    #[test]
    fn find_matching_trade_by_taker_id() {
        let order = TrackedOrder::new(
            OrderId::new("o1"),
            TokenId::new("yes"),
            ConditionId::new("c1"),
            Side::Buy,
            dec!(0.5),
            dec!(100),
            DateTime::from_timestamp(0, 0).unwrap(),
            0,
            true,
        );
        let trade = RemoteTrade {
            trade_id: "t1".into(),
            taker_order_id: Some("o1".into()),
            maker_order_ids: vec![],
            token_id: TokenId::new("yes"),
            side: Side::Buy,
            price: dec!(0.5),
            size: dec!(100),
            timestamp: DateTime::from_timestamp(0, 0).unwrap(),
        };
        assert!(find_matching_trade(&order, &[trade]).is_some());
    }

    #[test]
    fn find_matching_trade_by_price_and_size_tolerance() {
        let order = TrackedOrder::new(
            OrderId::new("o1"),
            TokenId::new("yes"),
            ConditionId::new("c1"),
            Side::Buy,
            dec!(0.50),
            dec!(100),
            DateTime::from_timestamp(0, 0).unwrap(),
            0,
            true,
        );
        let trade = RemoteTrade {
            trade_id: "t2".into(),
            taker_order_id: Some("someone-else".into()),
            maker_order_ids: vec![],
            token_id: TokenId::new("yes"),
            side: Side::Buy,
            price: dec!(0.505),
            size: dec!(100.5),
            timestamp: DateTime::from_timestamp(0, 0).unwrap(),
        };
        assert!(find_matching_trade(&order, &[trade]).is_some());
    }
}
