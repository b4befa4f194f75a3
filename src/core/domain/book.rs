//! Last observed price ladder for one token.

use chrono::{DateTime, Utc};

use super::money::{Price, Shares};
use crate::error::DomainError;

/// One rung of the bid or ask ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLevel {
    price: Price,
    size: Shares,
}

impl PriceLevel {
    #[must_use]
    pub const fn new(price: Price, size: Shares) -> Self {
        Self { price, size }
    }

    #[must_use]
    pub const fn price(&self) -> Price {
        self.price
    }

    #[must_use]
    pub const fn size(&self) -> Shares {
        self.size
    }
}

/// Last observed price ladder for one token.
///
/// Invariant: `best_bid < midpoint < best_ask < 1` and `midpoint > 0`
/// (`spec.md` §3). Constructed only through [`BookSnapshot::try_new`], which
/// enforces it.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    midpoint: Price,
    best_bid: Price,
    best_ask: Price,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    observed_at: DateTime<Utc>,
}

impl BookSnapshot {
    /// Construct a snapshot, validating the ordering invariant.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::BookOrientation`] if `best_bid < midpoint <
    /// best_ask < 1` and `midpoint > 0` do not hold.
    pub fn try_new(
        midpoint: Price,
        best_bid: Price,
        best_ask: Price,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let one = Price::from(1);
        let zero = Price::ZERO;
        if !(best_bid < midpoint && midpoint < best_ask && best_ask < one && midpoint > zero) {
            return Err(DomainError::BookOrientation {
                best_bid,
                midpoint,
                best_ask,
            });
        }
        Ok(Self {
            midpoint,
            best_bid,
            best_ask,
            bids,
            asks,
            observed_at,
        })
    }

    #[must_use]
    pub const fn midpoint(&self) -> Price {
        self.midpoint
    }

    #[must_use]
    pub const fn best_bid(&self) -> Price {
        self.best_bid
    }

    #[must_use]
    pub const fn best_ask(&self) -> Price {
        self.best_ask
    }

    #[must_use]
    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    #[must_use]
    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    #[must_use]
    pub const fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Invert bid/ask/midpoint and every ladder level (`x ↦ 1 − x`).
    ///
    /// Used for `neg_risk` book-orientation correction (`spec.md` §4.9, #8).
    #[must_use]
    pub fn inverted(&self, at: DateTime<Utc>) -> Self {
        let one = Price::from(1);
        let invert_level = |l: &PriceLevel| PriceLevel::new(one - l.price(), l.size());
        Self {
            midpoint: one - self.midpoint,
            best_bid: one - self.best_ask,
            best_ask: one - self.best_bid,
            bids: self.asks.iter().map(invert_level).collect(),
            asks: self.bids.iter().map(invert_level).collect(),
            observed_at: at,
        }
    }

    /// Overwrite the midpoint only, leaving the rest of the ladder intact
    /// (REST batch midpoint refresh, `spec.md` §4.9 step 3).
    pub fn set_midpoint(&mut self, midpoint: Price) {
        self.midpoint = midpoint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(0, 0).unwrap()
    }

    #[test]
    fn try_new_accepts_valid_ordering() {
        let snap = BookSnapshot::try_new(dec!(0.5), dec!(0.48), dec!(0.52), vec![], vec![], now());
        assert!(snap.is_ok());
    }

    #[test]
    fn try_new_rejects_crossed_book() {
        let snap = BookSnapshot::try_new(dec!(0.5), dec!(0.52), dec!(0.48), vec![], vec![], now());
        assert!(matches!(snap, Err(DomainError::BookOrientation { .. })));
    }

    #[test]
    fn try_new_rejects_ask_at_or_above_one() {
        let snap = BookSnapshot::try_new(dec!(0.9), dec!(0.8), dec!(1.0), vec![], vec![], now());
        assert!(snap.is_err());
    }

    #[test]
    fn try_new_rejects_zero_midpoint() {
        let snap = BookSnapshot::try_new(dec!(0.0), dec!(-0.1), dec!(0.1), vec![], vec![], now());
        assert!(snap.is_err());
    }

    #[test]
    fn inverted_swaps_and_flips_prices() {
        let snap = BookSnapshot::try_new(
            dec!(0.2),
            dec!(0.18),
            dec!(0.22),
            vec![PriceLevel::new(dec!(0.18), dec!(10))],
            vec![PriceLevel::new(dec!(0.22), dec!(20))],
            now(),
        )
        .unwrap();

        let inv = snap.inverted(now());
        assert_eq!(inv.midpoint(), dec!(0.8));
        assert_eq!(inv.best_bid(), dec!(0.78));
        assert_eq!(inv.best_ask(), dec!(0.82));
        assert_eq!(inv.bids()[0].price(), dec!(0.78));
        assert_eq!(inv.asks()[0].price(), dec!(0.82));
    }

    #[test]
    fn set_midpoint_overwrites_only_midpoint() {
        let mut snap =
            BookSnapshot::try_new(dec!(0.5), dec!(0.48), dec!(0.52), vec![], vec![], now()).unwrap();
        snap.set_midpoint(dec!(0.49));
        assert_eq!(snap.midpoint(), dec!(0.49));
        assert_eq!(snap.best_bid(), dec!(0.48));
    }
}
