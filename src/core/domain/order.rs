//! A limit order the system believes is live, and its placement spec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ConditionId, OrderId, TokenId};
use super::money::{Price, Shares};
use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// Order duration, as exposed by the exchange gateway (`spec.md` §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Good-till-cancel: rests until explicitly cancelled.
    Gtc,
    /// Good-till-date: rests until `expires_at`.
    Gtd { expires_at_unix: i64 },
    /// Fill-available-kill: fills what it can immediately, kills the rest.
    Fak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Live,
    Filled,
    Cancelled,
}

/// A target quote to place, produced by the Quote Engine and consumed by the
/// Order Manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub token_id: TokenId,
    pub condition_id: ConditionId,
    pub side: Side,
    pub price: Price,
    pub size: Shares,
    pub order_type: OrderType,
    pub post_only: bool,
    /// 0 = tightest level; used only for multi-level quoting strategies.
    pub level: u8,
    pub scoring: bool,
}

/// A limit order the system believes is live.
///
/// Invariant: `0 <= filled_size <= original_size` (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedOrder {
    order_id: OrderId,
    token_id: TokenId,
    condition_id: ConditionId,
    side: Side,
    price: Price,
    original_size: Shares,
    filled_size: Shares,
    status: Status,
    placed_at: DateTime<Utc>,
    level: u8,
    scoring: bool,
}

impl TrackedOrder {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        order_id: OrderId,
        token_id: TokenId,
        condition_id: ConditionId,
        side: Side,
        price: Price,
        original_size: Shares,
        placed_at: DateTime<Utc>,
        level: u8,
        scoring: bool,
    ) -> Self {
        Self {
            order_id,
            token_id,
            condition_id,
            side,
            price,
            original_size,
            filled_size: Shares::ZERO,
            status: Status::Live,
            placed_at,
            level,
            scoring,
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
    pub const fn original_size(&self) -> Shares {
        self.original_size
    }

    #[must_use]
    pub const fn filled_size(&self) -> Shares {
        self.filled_size
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub const fn placed_at(&self) -> DateTime<Utc> {
        self.placed_at
    }

    #[must_use]
    pub const fn level(&self) -> u8 {
        self.level
    }

    #[must_use]
    pub const fn is_scoring(&self) -> bool {
        self.scoring
    }

    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self.status, Status::Live)
    }

    /// Record additional fill, validating `filled_size <= original_size`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::FilledExceedsOriginal`] if the new total would
    /// exceed `original_size`.
    pub fn record_fill(&mut self, additional: Shares) -> Result<(), DomainError> {
        let new_total = self.filled_size + additional;
        if new_total > self.original_size {
            return Err(DomainError::FilledExceedsOriginal {
                order_id: self.order_id.to_string(),
                filled: new_total,
                original: self.original_size,
            });
        }
        self.filled_size = new_total;
        if self.filled_size == self.original_size {
            self.status = Status::Filled;
        }
        Ok(())
    }

    pub fn mark_cancelled(&mut self) {
        if self.status == Status::Live {
            self.status = Status::Cancelled;
        }
    }

    /// Matches a target spec by token, side, and price within `tolerance`
    /// (`spec.md` §4.5 step 2: "price within 1.5 × tick").
    #[must_use]
    pub fn matches_target(&self, target: &OrderSpec, tolerance: Price) -> bool {
        self.token_id == target.token_id
            && self.side == target.side
            && (self.price - target.price).abs() <= tolerance
    }
}
