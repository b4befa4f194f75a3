//! Per-market phase machine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ConditionId, OrderId, TokenId};
use super::money::Price;
use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Quoting,
    Cooldown,
    Exiting,
}

/// In-flight liquidation record for a fill the engine did not want.
///
/// Stage indexes the optional multi-stage exit ladder (`spec.md` §4.7); the
/// canonical immediate-sell path always enters at stage 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccidentalFill {
    token_id: TokenId,
    shares: Price,
    entry_price: Price,
    fill_timestamp: DateTime<Utc>,
    sell_order_id: Option<OrderId>,
    stage: u8,
}

impl AccidentalFill {
    #[must_use]
    pub const fn new(
        token_id: TokenId,
        shares: Price,
        entry_price: Price,
        fill_timestamp: DateTime<Utc>,
        stage: u8,
    ) -> Self {
        Self {
            token_id,
            shares,
            entry_price,
            fill_timestamp,
            sell_order_id: None,
            stage,
        }
    }

    #[must_use]
    pub const fn token_id(&self) -> &TokenId {
        &self.token_id
    }

    #[must_use]
    pub const fn shares(&self) -> Price {
        self.shares
    }

    #[must_use]
    pub const fn entry_price(&self) -> Price {
        self.entry_price
    }

    #[must_use]
    pub const fn fill_timestamp(&self) -> DateTime<Utc> {
        self.fill_timestamp
    }

    #[must_use]
    pub const fn sell_order_id(&self) -> Option<&OrderId> {
        self.sell_order_id.as_ref()
    }

    #[must_use]
    pub const fn stage(&self) -> u8 {
        self.stage
    }

    /// Accumulate another fill of the same token into an already in-flight
    /// liquidation (`spec.md` §4.7 step 3).
    pub fn accumulate(&mut self, additional_shares: Price) {
        self.shares += additional_shares;
    }

    pub fn set_sell_order_id(&mut self, id: OrderId) {
        self.sell_order_id = Some(id);
    }

    pub fn advance_stage(&mut self, stage: u8) {
        self.stage = stage;
    }
}

/// Per-market phase machine state.
///
/// Invariants (`spec.md` §3):
/// - In `Cooldown`, `active_order_ids` is empty and `cooldown_until > now`.
/// - In `Exiting`, `accidental_fill` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    condition_id: ConditionId,
    phase: Phase,
    cooldown_until: Option<DateTime<Utc>>,
    active_order_ids: Vec<OrderId>,
    orders_placed_at: Option<DateTime<Utc>>,
    consecutive_cooldowns: u32,
    empty_quote_ticks: u32,
    last_cooldown_mids: Option<HashMap<TokenId, Price>>,
    accidental_fill: Option<AccidentalFill>,
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Quoting => "quoting",
        Phase::Cooldown => "cooldown",
        Phase::Exiting => "exiting",
    }
}

impl MarketState {
    #[must_use]
    pub const fn new_quoting(condition_id: ConditionId) -> Self {
        Self {
            condition_id,
            phase: Phase::Quoting,
            cooldown_until: None,
            active_order_ids: Vec::new(),
            orders_placed_at: None,
            consecutive_cooldowns: 0,
            empty_quote_ticks: 0,
            last_cooldown_mids: None,
            accidental_fill: None,
        }
    }

    #[must_use]
    pub const fn condition_id(&self) -> &ConditionId {
        &self.condition_id
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.cooldown_until
    }

    #[must_use]
    pub fn active_order_ids(&self) -> &[OrderId] {
        &self.active_order_ids
    }

    #[must_use]
    pub const fn orders_placed_at(&self) -> Option<DateTime<Utc>> {
        self.orders_placed_at
    }

    #[must_use]
    pub const fn consecutive_cooldowns(&self) -> u32 {
        self.consecutive_cooldowns
    }

    #[must_use]
    pub const fn empty_quote_ticks(&self) -> u32 {
        self.empty_quote_ticks
    }

    #[must_use]
    pub const fn last_cooldown_mids(&self) -> Option<&HashMap<TokenId, Price>> {
        self.last_cooldown_mids.as_ref()
    }

    #[must_use]
    pub const fn accidental_fill(&self) -> Option<&AccidentalFill> {
        self.accidental_fill.as_ref()
    }

    #[must_use]
    pub fn accidental_fill_mut(&mut self) -> Option<&mut AccidentalFill> {
        self.accidental_fill.as_mut()
    }

    pub fn set_active_orders(&mut self, ids: Vec<OrderId>, placed_at: DateTime<Utc>) {
        self.active_order_ids = ids;
        self.orders_placed_at = Some(placed_at);
    }

    pub fn increment_empty_quote_ticks(&mut self) {
        self.empty_quote_ticks += 1;
    }

    pub fn reset_empty_quote_ticks(&mut self) {
        self.empty_quote_ticks = 0;
    }

    /// Reset the stability counter after a full refresh interval spent
    /// quoting without a cooldown (`spec.md` §4.6: "proof of stability").
    pub fn reset_consecutive_cooldowns(&mut self) {
        self.consecutive_cooldowns = 0;
    }

    /// Enter cooldown: synchronous state write performed before any
    /// cancellation RPC is awaited (`spec.md` §4.6 step 1, §5 ordering
    /// guarantee). Returns an error if already outside `Quoting`, so a second
    /// concurrent trigger is a safe no-op for the caller to detect.
    pub fn enter_cooldown(
        &mut self,
        now: DateTime<Utc>,
        cooldown_ms: i64,
        mids: HashMap<TokenId, Price>,
    ) -> Result<(), DomainError> {
        if self.phase != Phase::Quoting {
            return Err(DomainError::InvalidPhaseTransition {
                market_id: self.condition_id.to_string(),
                phase: phase_name(self.phase),
                action: "enter_cooldown",
            });
        }
        self.phase = Phase::Cooldown;
        self.cooldown_until = Some(now + chrono::Duration::milliseconds(cooldown_ms));
        self.active_order_ids.clear();
        self.consecutive_cooldowns += 1;
        self.last_cooldown_mids = Some(mids);
        Ok(())
    }

    /// Transition back to `Quoting` after a cooldown expires and the market
    /// survives rescan (`spec.md` §4.6).
    pub fn resume_quoting(&mut self) -> Result<(), DomainError> {
        if self.phase != Phase::Cooldown {
            return Err(DomainError::InvalidPhaseTransition {
                market_id: self.condition_id.to_string(),
                phase: phase_name(self.phase),
                action: "resume_quoting",
            });
        }
        self.phase = Phase::Quoting;
        self.cooldown_until = None;
        Ok(())
    }

    /// Enter the exit sub-state machine for a newly detected fill.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidPhaseTransition`] if already `Exiting`
    /// with a different in-flight token (callers should accumulate instead,
    /// `spec.md` §4.7 step 3).
    pub fn enter_exiting(&mut self, fill: AccidentalFill) -> Result<(), DomainError> {
        if self.phase == Phase::Exiting {
            return Err(DomainError::InvalidPhaseTransition {
                market_id: self.condition_id.to_string(),
                phase: phase_name(self.phase),
                action: "enter_exiting",
            });
        }
        self.phase = Phase::Exiting;
        self.active_order_ids.clear();
        self.accidental_fill = Some(fill);
        Ok(())
    }

    /// Leave `Exiting` for `Cooldown`, regardless of sell outcome
    /// (`spec.md` §4.7 step 9).
    pub fn exit_to_cooldown(&mut self, now: DateTime<Utc>, cooldown_ms: i64) {
        self.phase = Phase::Cooldown;
        self.cooldown_until = Some(now + chrono::Duration::milliseconds(cooldown_ms));
        self.active_order_ids.clear();
        self.accidental_fill = None;
    }
}
