//! Net exposure per token.

use serde::{Deserialize, Serialize};

use super::id::{ConditionId, TokenId};
use super::money::{Price, Shares};

/// Net exposure per token (long-only in the core strategy — the bot never
/// intentionally goes short, `spec.md` §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    condition_id: ConditionId,
    token_id: TokenId,
    outcome_label: String,
    net_shares: Shares,
    avg_entry_price: Price,
    realized_pnl: Price,
}

impl Position {
    #[must_use]
    pub fn new(condition_id: ConditionId, token_id: TokenId, outcome_label: impl Into<String>) -> Self {
        Self {
            condition_id,
            token_id,
            outcome_label: outcome_label.into(),
            net_shares: Shares::ZERO,
            avg_entry_price: Price::ZERO,
            realized_pnl: Price::ZERO,
        }
    }

    #[must_use]
    pub const fn condition_id(&self) -> &ConditionId {
        &self.condition_id
    }

    #[must_use]
    pub const fn token_id(&self) -> &TokenId {
        &self.token_id
    }

    #[must_use]
    pub fn outcome_label(&self) -> &str {
        &self.outcome_label
    }

    #[must_use]
    pub const fn net_shares(&self) -> Shares {
        self.net_shares
    }

    #[must_use]
    pub const fn avg_entry_price(&self) -> Price {
        self.avg_entry_price
    }

    #[must_use]
    pub const fn realized_pnl(&self) -> Price {
        self.realized_pnl
    }

    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.net_shares.is_zero()
    }

    /// Apply a BUY fill: grows the position and recomputes the
    /// volume-weighted average entry price.
    pub fn apply_buy(&mut self, size: Shares, price: Price) {
        let prior_cost = self.net_shares * self.avg_entry_price;
        let new_cost = prior_cost + size * price;
        self.net_shares += size;
        self.avg_entry_price = if self.net_shares.is_zero() {
            Price::ZERO
        } else {
            new_cost / self.net_shares
        };
    }

    /// Apply a SELL fill: shrinks the position and realizes P&L against the
    /// average entry price. Caps the sell at the current net size.
    pub fn apply_sell(&mut self, size: Shares, price: Price) {
        let sold = size.min(self.net_shares);
        self.realized_pnl += sold * (price - self.avg_entry_price);
        self.net_shares -= sold;
        if self.net_shares.is_zero() {
            self.avg_entry_price = Price::ZERO;
        }
    }

    /// Overwrite the locally-tracked share count with what the exchange's
    /// own position ledger reports, ahead of a liquidation sweep. Leaves
    /// `avg_entry_price` as-is; it only feeds P&L accounting, not sizing.
    pub fn reconcile_remote_shares(&mut self, remote_shares: Shares) {
        self.net_shares = remote_shares;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pos() -> Position {
        Position::new(ConditionId::new("c1"), TokenId::new("yes"), "Yes")
    }

    #[test]
    fn apply_buy_from_flat_sets_entry_price() {
        let mut p = pos();
        p.apply_buy(dec!(100), dec!(0.5));
        assert_eq!(p.net_shares(), dec!(100));
        assert_eq!(p.avg_entry_price(), dec!(0.5));
    }

    #[test]
    fn apply_buy_accumulates_vwap() {
        let mut p = pos();
        p.apply_buy(dec!(100), dec!(0.5));
        p.apply_buy(dec!(100), dec!(0.6));
        assert_eq!(p.net_shares(), dec!(200));
        assert_eq!(p.avg_entry_price(), dec!(0.55));
    }

    #[test]
    fn apply_sell_realizes_pnl_and_shrinks() {
        let mut p = pos();
        p.apply_buy(dec!(100), dec!(0.5));
        p.apply_sell(dec!(50), dec!(0.6));
        assert_eq!(p.net_shares(), dec!(50));
        assert_eq!(p.realized_pnl(), dec!(5)); // 50 * (0.6 - 0.5)
    }

    #[test]
    fn apply_sell_caps_at_net_shares() {
        let mut p = pos();
        p.apply_buy(dec!(100), dec!(0.5));
        p.apply_sell(dec!(500), dec!(0.6));
        assert!(p.is_flat());
        assert_eq!(p.realized_pnl(), dec!(10)); // only 100 sold
        assert_eq!(p.avg_entry_price(), Price::ZERO);
    }

    #[test]
    fn is_flat_true_when_no_shares() {
        assert!(pos().is_flat());
    }
}
