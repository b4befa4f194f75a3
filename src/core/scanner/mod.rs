//! Market Scanner: two-phase discovery bounded by API cost (`spec.md` §4.2).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use rust_decimal::prelude::ToPrimitive;
use tracing::{info, warn};

use crate::core::domain::{ConditionId, Market, Price, RewardConfig, Token};
use crate::core::exchange::{ExchangeGateway, GatewayError, MarketMeta, RawOrderBook};
use crate::core::quote::scoring::{q_min, scanner_score};

/// Reward-configuration candidates considered past the first filtering pass
/// (`spec.md` §4.2 step 1: "N around 30").
pub const CANDIDATE_POOL_SIZE: usize = 30;

/// Extreme-price rejection band applied to *both* legs simultaneously
/// (`spec.md` §4.2 step 2).
const BOTH_LEGS_EXTREME_LOW: Decimal = dec!(0.02);
const BOTH_LEGS_EXTREME_HIGH: Decimal = dec!(0.98);

/// `should_rescan` fires after this much time since the last scan
/// (`spec.md` §4.2 step "more than 30 minutes").
pub const RESCAN_INTERVAL: chrono::Duration = chrono::Duration::minutes(30);

/// Tunables for candidate acceptance (`spec.md` §4.2 step 2, §6).
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub min_reward_rate: Price,
    pub max_capital_per_market: Price,
    pub min_max_spread: Option<Price>,
    /// Reject candidates whose combined top-of-book bid depth (both legs)
    /// is below this notional (`spec.md` §6: `min_bid_depth_usd`).
    pub min_bid_depth_usd: Option<Price>,
    /// Reject candidates below this trailing 24h volume, when the exchange
    /// reports one (`spec.md` §6: `min_daily_volume`).
    pub min_daily_volume: Option<Price>,
}

/// A ranked scanner candidate, kept alongside the metadata needed to build
/// a [`Market`] once it is selected (`spec.md` §4.2 step 4).
#[derive(Debug, Clone)]
pub struct ScannedMarket {
    pub market: Market,
    pub score: f64,
    /// This bot's estimated `Q_min` at scan time, kept for `reward-status`
    /// reporting (`spec.md` §4.4).
    pub q_min_own: f64,
}

/// Cached ranked list plus the timestamp of the scan that produced it
/// (`spec.md` §4.2 step 4: "Cache the ranked list and a scan timestamp").
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub ranked: Vec<ScannedMarket>,
    pub scanned_at: Option<DateTime<Utc>>,
}

impl ScanResult {
    /// Highest-scoring prefix not in `excluded`, bounded by
    /// `max_concurrent_markets` (`spec.md` §4.2: `select_active_markets`).
    #[must_use]
    pub fn select_active_markets(&self, excluded: &[ConditionId], max_concurrent_markets: usize) -> Vec<Market> {
        self.ranked
            .iter()
            .filter(|c| !excluded.contains(c.market.condition_id()))
            .take(max_concurrent_markets)
            .map(|c| c.market.clone())
            .collect()
    }

    /// `true` once more than [`RESCAN_INTERVAL`] has elapsed since the last
    /// scan, or no scan has ever run.
    #[must_use]
    pub fn should_rescan(&self, now: DateTime<Utc>) -> bool {
        match self.scanned_at {
            None => true,
            Some(at) => now.signed_duration_since(at) > RESCAN_INTERVAL,
        }
    }
}

/// Run a full scan: fetch reward configs, filter and rank top candidates,
/// fetch per-candidate metadata and a book, and score survivors
/// (`spec.md` §4.2 steps 1-4).
///
/// # Errors
///
/// Returns [`GatewayError`] only if `get_reward_configs` itself fails; a
/// failure to fetch one candidate's metadata is logged and that candidate is
/// skipped rather than failing the whole scan.
pub async fn scan(
    gateway: &dyn ExchangeGateway,
    config: &ScanConfig,
    now: DateTime<Utc>,
) -> Result<ScanResult, GatewayError> {
    let configs = gateway.get_reward_configs().await?;

    let mut eligible: Vec<RewardConfig> = configs
        .into_iter()
        .filter(|c| c.meets_min_rate(config.min_reward_rate))
        .collect();
    eligible.sort_by(|a, b| b.daily_rate().cmp(&a.daily_rate()));
    eligible.truncate(CANDIDATE_POOL_SIZE);

    let mut ranked = Vec::with_capacity(eligible.len());
    for candidate in &eligible {
        match evaluate_candidate(gateway, candidate, config, now).await {
            Ok(Some(scanned)) => ranked.push(scanned),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    error = %e,
                    condition = %candidate.condition_id(),
                    "failed to evaluate scanner candidate, skipping"
                );
            }
        }
    }

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    info!(candidates = eligible.len(), accepted = ranked.len(), "scan complete");

    Ok(ScanResult {
        ranked,
        scanned_at: Some(now),
    })
}

async fn evaluate_candidate(
    gateway: &dyn ExchangeGateway,
    candidate: &RewardConfig,
    config: &ScanConfig,
    now: DateTime<Utc>,
) -> Result<Option<ScannedMarket>, GatewayError> {
    let meta = gateway.get_market(candidate.condition_id()).await?;
    if !is_eligible(&meta, candidate, config, now) {
        return Ok(None);
    }
    if let Some(min_volume) = config.min_daily_volume {
        if meta.daily_volume.is_some_and(|v| v < min_volume) {
            return Ok(None);
        }
    }

    let yes_book = gateway.get_order_book(meta.yes.id()).await?;
    let no_book = gateway.get_order_book(meta.no.id()).await?;

    let (Some(yes_snapshot), Some(no_snapshot)) = (
        snapshot_from_raw(&yes_book),
        snapshot_from_raw(&no_book),
    ) else {
        return Ok(None);
    };

    let yes_price = yes_snapshot.midpoint();
    let no_price = no_snapshot.midpoint();
    if both_legs_extreme(yes_price, no_price) {
        return Ok(None);
    }

    let required_capital = candidate.min_size() * (yes_price + no_price);
    if required_capital > config.max_capital_per_market {
        return Ok(None);
    }

    if let Some(min_depth) = config.min_bid_depth_usd {
        let depth = bid_depth_usd(&yes_snapshot) + bid_depth_usd(&no_snapshot);
        if depth < min_depth {
            return Ok(None);
        }
    }

    if let Some(min_max_spread) = config.min_max_spread {
        if candidate.max_spread() < min_max_spread {
            return Ok(None);
        }
    }

    let q_min_own = q_min(&yes_snapshot, &no_snapshot, candidate.max_spread());
    let competition = competition_usdc(&yes_snapshot, &no_snapshot, candidate.max_spread());

    let daily_rate_f64 = to_f64(candidate.daily_rate());
    let max_spread_f64 = to_f64(candidate.max_spread());
    let required_capital_f64 = to_f64(required_capital);
    let score = scanner_score(daily_rate_f64, max_spread_f64, competition, required_capital_f64);

    let market = Market::new(
        meta.condition_id.clone(),
        meta.question.clone(),
        meta.yes.clone(),
        meta.no.clone(),
        candidate.max_spread(),
        candidate.min_size(),
        candidate.daily_rate(),
        meta.tick_size,
        meta.neg_risk,
        score,
    );

    Ok(Some(ScannedMarket { market, score, q_min_own }))
}

fn is_eligible(meta: &MarketMeta, candidate: &RewardConfig, config: &ScanConfig, now: DateTime<Utc>) -> bool {
    if !meta.active {
        return false;
    }
    if let Some(end) = meta.end_date {
        if end < now {
            return false;
        }
    }
    let _ = candidate;
    let _ = config;
    true
}

fn both_legs_extreme(yes: Price, no: Price) -> bool {
    let both_low = yes < BOTH_LEGS_EXTREME_LOW && no < BOTH_LEGS_EXTREME_LOW;
    let both_high = yes > BOTH_LEGS_EXTREME_HIGH && no > BOTH_LEGS_EXTREME_HIGH;
    both_low || both_high
}

fn snapshot_from_raw(raw: &RawOrderBook) -> Option<crate::core::domain::BookSnapshot> {
    let best_bid = raw.bids.last()?.price();
    let best_ask = raw.asks.first()?.price();
    let midpoint = (best_bid + best_ask) / dec!(2);
    crate::core::domain::BookSnapshot::try_new(
        midpoint,
        best_bid,
        best_ask,
        raw.bids.clone(),
        raw.asks.clone(),
        raw.observed_at,
    )
    .ok()
}

fn bid_depth_usd(book: &crate::core::domain::BookSnapshot) -> Price {
    book.bids().iter().map(|l| l.price() * l.size()).sum()
}

fn competition_usdc(own: &crate::core::domain::BookSnapshot, complement: &crate::core::domain::BookSnapshot, max_spread: Price) -> f64 {
    use crate::core::quote::scoring::sum_levels_score;
    sum_levels_score(own.bids(), own.midpoint(), max_spread)
        + sum_levels_score(own.asks(), own.midpoint(), max_spread)
        + sum_levels_score(complement.bids(), complement.midpoint(), max_spread)
        + sum_levels_score(complement.asks(), complement.midpoint(), max_spread)
}

fn to_f64(d: Price) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Swap-in helper for call sites that need a [`Token`] reference and only
/// have a [`MarketMeta`] (kept as a single conversion point).
#[must_use]
pub fn tokens_of(meta: &MarketMeta) -> (&Token, &Token) {
    (&meta.yes, &meta.no)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_legs_extreme_detects_low_and_high() {
        assert!(both_legs_extreme(dec!(0.01), dec!(0.01)));
        assert!(both_legs_extreme(dec!(0.99), dec!(0.99)));
        assert!(!both_legs_extreme(dec!(0.01), dec!(0.5)));
        assert!(!both_legs_extreme(dec!(0.5), dec!(0.5)));
    }

    #[test]
    fn select_active_markets_excludes_and_bounds() {
        let c1 = ConditionId::new("c1");
        let c2 = ConditionId::new("c2");
        let market = |id: &ConditionId| {
            Market::new(
                id.clone(),
                "q",
                Token::new(crate::core::domain::TokenId::new("yes"), "Yes", crate::core::domain::TokenId::new("no")),
                Token::new(crate::core::domain::TokenId::new("no"), "No", crate::core::domain::TokenId::new("yes")),
                dec!(0.05),
                dec!(100),
                dec!(30),
                dec!(0.01),
                false,
                1.0,
            )
        };
        let result = ScanResult {
            ranked: vec![
                ScannedMarket { market: market(&c1), score: 2.0, q_min_own: 0.0 },
                ScannedMarket { market: market(&c2), score: 1.0, q_min_own: 0.0 },
            ],
            scanned_at: Some(DateTime::from_timestamp(0, 0).unwrap()),
        };
        let selected = result.select_active_markets(&[c1.clone()], 5);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].condition_id(), &c2);
    }

    #[test]
    fn should_rescan_true_without_prior_scan() {
        let result = ScanResult::default();
        assert!(result.should_rescan(DateTime::from_timestamp(0, 0).unwrap()));
    }

    #[test]
    fn should_rescan_fires_after_interval() {
        let result = ScanResult {
            ranked: vec![],
            scanned_at: Some(DateTime::from_timestamp(0, 0).unwrap()),
        };
        let just_under = DateTime::from_timestamp(29 * 60, 0).unwrap();
        let just_over = DateTime::from_timestamp(31 * 60, 0).unwrap();
        assert!(!result.should_rescan(just_under));
        assert!(result.should_rescan(just_over));
    }
}
