//! Quote Engine: turns a market's current books into a set of target BUY
//! quotes (`spec.md` §4.3).

pub mod scoring;

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::core::domain::{
    order::OrderType, BookSnapshot, Market, OrderSpec, Price, Shares, Side, TokenId,
};

/// Tunable parameters for quote placement (`spec.md` §4.3, §6).
#[derive(Debug, Clone)]
pub struct QuoteConfig {
    /// Fraction of `max_spread` subtracted from midpoint to land the bid.
    /// Constrained to `[0.35, 0.85]`.
    pub spread_ratio: Decimal,
    /// Quote only the cheaper token unless the market is in the extreme
    /// regime, where both sides are always quoted.
    pub single_sided: bool,
    /// Minimum buffer, in ticks, the bid must sit below the midpoint.
    pub min_ticks_from_mid: u32,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            spread_ratio: dec!(0.6),
            single_sided: false,
            min_ticks_from_mid: 1,
        }
    }
}

/// `true` when either leg's midpoint is outside `[0.10, 0.90]`
/// (`spec.md` §4.3, §4.4).
#[must_use]
pub fn is_extreme_regime(m0: Price, m1: Price) -> bool {
    let hi = m0.max(m1);
    let lo = m0.min(m1);
    hi > dec!(0.9) || lo < dec!(0.1)
}

/// Q-min balanced per-token USD budget allocation (`spec.md` §4.3).
///
/// Allocates a combined `2 * order_size` budget proportionally to each
/// token's price so that resulting share counts are roughly equal, subject
/// to a `min_size * price * 1.1` floor on each side.
#[must_use]
pub fn allocate_budgets(m0: Price, m1: Price, order_size: Shares, min_size: Shares) -> (Price, Price) {
    let combined = order_size * dec!(2);
    let total = m0 + m1;
    let (raw0, raw1) = if total.is_zero() {
        (combined / dec!(2), combined / dec!(2))
    } else {
        (combined * m0 / total, combined * m1 / total)
    };
    let floor0 = min_size * m0 * dec!(1.1);
    let floor1 = min_size * m1 * dec!(1.1);
    (raw0.max(floor0), raw1.max(floor1))
}

/// Round `price` down to the nearest multiple of `tick`.
#[must_use]
pub fn floor_to_tick(price: Price, tick: Price) -> Price {
    if tick.is_zero() {
        return price;
    }
    (price / tick).floor() * tick
}

/// Target bid price for one token, or `None` if no valid bid can be placed
/// inside the constraints (`spec.md` §4.3 steps 2-3).
#[must_use]
pub fn target_bid_price(book: &BookSnapshot, max_spread: Price, tick: Price, config: &QuoteConfig) -> Option<Price> {
    let midpoint = book.midpoint();
    let raw = midpoint - max_spread * config.spread_ratio;
    let bid = floor_to_tick(raw, tick);

    if bid <= Price::ZERO {
        return None;
    }
    let min_buffer = tick * Decimal::from(config.min_ticks_from_mid);
    if midpoint - bid < min_buffer {
        return None;
    }
    if bid >= book.best_ask() - tick {
        return None;
    }
    if midpoint - bid >= max_spread {
        return None;
    }
    Some(bid)
}

/// Size a quote from a USD budget at `price`, honoring `min_size` and the
/// `1.2x` growth cap (`spec.md` §4.3 step 4).
#[must_use]
pub fn size_quote(budget: Price, unfloored_budget: Price, price: Price, min_size: Shares) -> Option<Shares> {
    if price.is_zero() {
        return None;
    }
    let raw_shares = unfloored_budget / price;
    let bumped_shares = budget / price;
    let capped = bumped_shares.min(raw_shares * dec!(1.2));
    if capped < min_size {
        None
    } else {
        Some(capped)
    }
}

/// Produce target quotes for every token of `market`, given current book
/// snapshots keyed by token id and a per-market `order_size` USD budget.
#[must_use]
pub fn quotes_for_market(
    market: &Market,
    books: &HashMap<TokenId, BookSnapshot>,
    order_size: Shares,
    config: &QuoteConfig,
) -> Vec<OrderSpec> {
    let [yes, no] = market.tokens();
    let (Some(yes_book), Some(no_book)) = (books.get(yes.id()), books.get(no.id())) else {
        return Vec::new();
    };

    let m0 = yes_book.midpoint();
    let m1 = no_book.midpoint();
    let extreme = is_extreme_regime(m0, m1);
    let (budget0, budget1) = allocate_budgets(m0, m1, order_size, market.min_size());
    let unfloored_combined = order_size * dec!(2);
    let total = m0 + m1;
    let (unfloored0, unfloored1) = if total.is_zero() {
        (unfloored_combined / dec!(2), unfloored_combined / dec!(2))
    } else {
        (unfloored_combined * m0 / total, unfloored_combined * m1 / total)
    };

    let quote_yes_allowed = extreme || !config.single_sided || m0 <= m1;
    let quote_no_allowed = extreme || !config.single_sided || m1 < m0;

    let mut quotes = Vec::with_capacity(2);
    if quote_yes_allowed {
        if let Some(spec) = build_quote(yes.id().clone(), market, yes_book, budget0, unfloored0, config) {
            quotes.push(spec);
        }
    }
    if quote_no_allowed {
        if let Some(spec) = build_quote(no.id().clone(), market, no_book, budget1, unfloored1, config) {
            quotes.push(spec);
        }
    }
    quotes
}

fn build_quote(
    token_id: TokenId,
    market: &Market,
    book: &BookSnapshot,
    budget: Price,
    unfloored_budget: Price,
    config: &QuoteConfig,
) -> Option<OrderSpec> {
    let tick = market.tick_size();
    let price = target_bid_price(book, market.max_spread(), tick, config)?;
    let size = size_quote(budget, unfloored_budget, price, market.min_size())?;

    Some(OrderSpec {
        token_id,
        condition_id: market.condition_id().clone(),
        side: Side::Buy,
        price,
        size,
        order_type: OrderType::Gtd {
            expires_at_unix: 0, // stamped by the caller with `now + 360s` at placement time
        },
        post_only: true,
        level: 0,
        scoring: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{ConditionId, PriceLevel, Token};
    use chrono::DateTime;

    fn now() -> chrono::DateTime<chrono::Utc> {
        DateTime::from_timestamp(0, 0).unwrap()
    }

    fn book(mid: Price, bid: Price, ask: Price) -> BookSnapshot {
        BookSnapshot::try_new(mid, bid, ask, vec![], vec![], now()).unwrap()
    }

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

    #[test]
    fn is_extreme_regime_detects_both_tails() {
        assert!(is_extreme_regime(dec!(0.95), dec!(0.05)));
        assert!(is_extreme_regime(dec!(0.05), dec!(0.95)));
        assert!(!is_extreme_regime(dec!(0.5), dec!(0.5)));
    }

    #[test]
    fn allocate_budgets_splits_proportionally_to_price() {
        let (b0, b1) = allocate_budgets(dec!(0.7), dec!(0.3), dec!(100), dec!(10));
        assert!(b0 > b1);
        assert_eq!(b0 + b1, dec!(200));
    }

    #[test]
    fn allocate_budgets_respects_floor() {
        let (b0, _) = allocate_budgets(dec!(0.01), dec!(0.99), dec!(1), dec!(100));
        let floor = dec!(100) * dec!(0.01) * dec!(1.1);
        assert_eq!(b0, floor);
    }

    #[test]
    fn floor_to_tick_rounds_down() {
        assert_eq!(floor_to_tick(dec!(0.4567), dec!(0.01)), dec!(0.45));
    }

    #[test]
    fn target_bid_price_respects_no_crossing_constraint() {
        let b = book(dec!(0.5), dec!(0.48), dec!(0.52));
        let cfg = QuoteConfig::default();
        let bid = target_bid_price(&b, dec!(0.05), dec!(0.01), &cfg).unwrap();
        assert!(bid < b.best_ask());
        assert!(bid > Price::ZERO);
    }

    #[test]
    fn target_bid_price_none_when_spread_too_tight() {
        let b = book(dec!(0.5), dec!(0.495), dec!(0.505));
        let cfg = QuoteConfig::default();
        assert!(target_bid_price(&b, dec!(0.01), dec!(0.01), &cfg).is_none());
    }

    #[test]
    fn size_quote_rejects_below_min_size() {
        assert!(size_quote(dec!(1), dec!(1), dec!(0.5), dec!(100)).is_none());
    }

    #[test]
    fn size_quote_accepts_above_min_size() {
        let size = size_quote(dec!(100), dec!(100), dec!(0.5), dec!(10)).unwrap();
        assert_eq!(size, dec!(200));
    }

    #[test]
    fn quotes_for_market_produces_both_legs_when_balanced() {
        let mut books = HashMap::new();
        books.insert(TokenId::new("yes"), book(dec!(0.5), dec!(0.3), dec!(0.7)));
        books.insert(TokenId::new("no"), book(dec!(0.5), dec!(0.3), dec!(0.7)));
        let quotes = quotes_for_market(&market(), &books, dec!(500), &QuoteConfig::default());
        assert_eq!(quotes.len(), 2);
        assert!(quotes.iter().all(|q| q.side == Side::Buy));
    }

    #[test]
    fn quotes_for_market_empty_when_book_missing() {
        let books = HashMap::new();
        let quotes = quotes_for_market(&market(), &books, dec!(500), &QuoteConfig::default());
        assert!(quotes.is_empty());
    }
}
