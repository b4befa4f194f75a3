//! Immutable historical fill record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ConditionId, OrderId, TokenId};
use super::money::{Price, Shares};
use super::order::Side;

/// Immutable historical record of a detected fill.
///
/// Pruned by age with a two-hour rolling window (`spec.md` §3); pruning is
/// the caller's responsibility (see `EngineState::prune_fill_history`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    order_id: OrderId,
    token_id: TokenId,
    condition_id: ConditionId,
    side: Side,
    price: Price,
    size: Shares,
    timestamp: DateTime<Utc>,
}

impl FillEvent {
    #[must_use]
    pub const fn new(
        order_id: OrderId,
        token_id: TokenId,
        condition_id: ConditionId,
        side: Side,
        price: Price,
        size: Shares,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            token_id,
            condition_id,
            side,
            price,
            size,
            timestamp,
        }
    }

    #[must_use]
    pub const fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    #[must_use]
    pub const fn token_id(&self) -> &TokenId {
        &self.token_id
    }

    #[must_use]
    pub const fn condition_id(&self) -> &ConditionId {
        &self.condition_id
    }

    #[must_use]
    pub const fn side(&self) -> Side {
        self.side
    }

    #[must_use]
    pub const fn price(&self) -> Price {
        self.price
    }

    #[must_use]
    pub const fn size(&self) -> Shares {
        self.size
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn is_older_than(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now.signed_duration_since(self.timestamp) > window
    }
}

/// Retain only fill events within `window` of `now` (`spec.md` §3: two-hour
/// rolling window).
pub fn prune_fill_history(history: &mut Vec<FillEvent>, now: DateTime<Utc>, window: chrono::Duration) {
    history.retain(|f| !f.is_older_than(now, window));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event_at(secs: i64) -> FillEvent {
        FillEvent::new(
            OrderId::new("o1"),
            TokenId::new("yes"),
            ConditionId::new("c1"),
            Side::Buy,
            dec!(0.5),
            dec!(10),
            DateTime::from_timestamp(secs, 0).unwrap(),
        )
    }

    #[test]
    fn is_older_than_respects_window() {
        let e = event_at(0);
        let now = DateTime::from_timestamp(3 * 3600, 0).unwrap();
        assert!(e.is_older_than(now, chrono::Duration::hours(2)));
        let now = DateTime::from_timestamp(3600, 0).unwrap();
        assert!(!e.is_older_than(now, chrono::Duration::hours(2)));
    }

    #[test]
    fn prune_fill_history_drops_stale_entries() {
        let mut history = vec![event_at(0), event_at(10_000)];
        let now = DateTime::from_timestamp(10_000, 0).unwrap();
        prune_fill_history(&mut history, now, chrono::Duration::hours(2));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].timestamp(), DateTime::from_timestamp(10_000, 0).unwrap());
    }
}
