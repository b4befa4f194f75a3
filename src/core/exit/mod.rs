//! Accidental-Fill Handler: drives the exit sub-state machine that
//! liquidates inventory from an unwanted fill (`spec.md` §4.7).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::core::domain::{order::OrderType, AccidentalFill, Market, OrderSpec, Price, Shares, Side, TokenId};
use crate::core::exchange::{ExchangeGateway, GatewayError};

/// Stage the canonical immediate-sell path always enters at
/// (`spec.md` §4.7 step 7: "skips the gradual staging").
pub const IMMEDIATE_SELL_STAGE: u8 = 3;

/// Poll attempts and inter-attempt delays for the balance settle-check
/// (`spec.md` §4.7 step 8a).
pub const BALANCE_POLL_DELAYS_SECS: [u64; 6] = [2, 2, 3, 3, 3, 3];

/// Fraction of expected balance that counts as "settled" (`spec.md` §4.7
/// step 8a).
pub const BALANCE_SETTLE_FRACTION: Decimal = dec!(0.9);

/// Retries for the FAK sell on transient balance/allowance errors
/// (`spec.md` §4.7 step 8b).
pub const SELL_RETRY_ATTEMPTS: u32 = 3;

/// Default multi-stage exit ladder minute offsets (`spec.md` §4.7, optional
/// fallback strategy).
pub const DEFAULT_STAGE_MINUTES: (u32, u32, u32, u32) = (5, 15, 30, 60);

/// Poll the conditional-token balance until it settles to at least
/// `BALANCE_SETTLE_FRACTION * expected`, or exhaust the retry schedule.
pub async fn wait_for_settlement(
    gateway: &dyn ExchangeGateway,
    token: &TokenId,
    expected: Shares,
) -> Option<Shares> {
    for delay_secs in BALANCE_POLL_DELAYS_SECS {
        match gateway.get_conditional_balance(token).await {
            Ok(balance) if balance >= expected * BALANCE_SETTLE_FRACTION => return Some(balance),
            Ok(_) => {}
            Err(e) => warn!(error = %e, token = %token, "balance poll failed during settle wait"),
        }
        sleep(std::time::Duration::from_secs(delay_secs)).await;
    }
    None
}

/// Execute the canonical immediate-sell exit (`spec.md` §4.7 step 8).
///
/// Submits a `FAK` SELL at `max(0.01, best_bid)` for the settled balance,
/// with up to [`SELL_RETRY_ATTEMPTS`] retries on transient rejection.
pub async fn immediate_sell(
    gateway: &dyn ExchangeGateway,
    market: &Market,
    accidental_fill: &AccidentalFill,
) -> Option<(Price, Shares)> {
    let expected = accidental_fill.shares();
    let token = accidental_fill.token_id();

    let settled = wait_for_settlement(gateway, token, expected).await;
    let balance = match settled {
        Some(b) => b,
        None => {
            warn!(token = %token, "balance never settled, leaving position for manual recovery");
            return None;
        }
    };

    let best_bid = match gateway.get_order_book(token).await {
        Ok(book) => book.bids.last().map(|l| l.price()).unwrap_or(Price::ZERO),
        Err(e) => {
            warn!(error = %e, token = %token, "order book fetch failed before sell");
            Price::ZERO
        }
    };
    let sell_price = best_bid.max(dec!(0.01));

    let spec = OrderSpec {
        token_id: token.clone(),
        condition_id: market.condition_id().clone(),
        side: Side::Sell,
        price: sell_price,
        size: balance,
        order_type: OrderType::Fak,
        post_only: false,
        level: 0,
        scoring: false,
    };

    for attempt in 1..=SELL_RETRY_ATTEMPTS {
        match gateway.create_and_post_order(&spec).await {
            Ok(ack) if ack.success => {
                info!(token = %token, price = %sell_price, size = %balance, "immediate sell placed");
                return Some((sell_price, balance));
            }
            Ok(_) => {}
            Err(e) if is_transient(&e) => {
                warn!(error = %e, attempt, "immediate sell rejected transiently, retrying");
            }
            Err(e) => {
                warn!(error = %e, "immediate sell failed non-transiently");
                return None;
            }
        }
    }
    None
}

fn is_transient(e: &GatewayError) -> bool {
    matches!(e, GatewayError::InsufficientBalance | GatewayError::RateLimited)
}

/// `(t1,t2,t3,t4)` elapsed-minute boundaries for the optional multi-stage
/// ladder, and which stage applies at `elapsed` (`spec.md` §4.7, optional
/// fallback). Kept as a separate, non-default strategy: the canonical path
/// is [`immediate_sell`].
#[must_use]
pub fn multi_stage_for_elapsed(elapsed_minutes: u32, stages: (u32, u32, u32, u32)) -> u8 {
    let (t1, t2, t3, _t4) = stages;
    if elapsed_minutes < t1 {
        1
    } else if elapsed_minutes < t2 {
        2
    } else if elapsed_minutes < t3 {
        3
    } else {
        4
    }
}

/// Minimum sell price floor for the stage-3 FAK sell in the multi-stage
/// ladder: `entry_price * min_sell_price_ratio`.
#[must_use]
pub fn stage3_price_floor(entry_price: Price, min_sell_price_ratio: Price) -> Price {
    entry_price * min_sell_price_ratio
}

/// `true` when an `Exiting` phase has overstayed without an in-flight
/// accidental-fill record and must be forced back to `Cooldown`
/// (`spec.md` §4.9 step 5).
#[must_use]
pub fn exiting_timed_out(entered_at: DateTime<Utc>, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
    now.signed_duration_since(entered_at) > timeout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_stage_for_elapsed_picks_correct_stage() {
        let stages = DEFAULT_STAGE_MINUTES;
        assert_eq!(multi_stage_for_elapsed(0, stages), 1);
        assert_eq!(multi_stage_for_elapsed(10, stages), 2);
        assert_eq!(multi_stage_for_elapsed(20, stages), 3);
        assert_eq!(multi_stage_for_elapsed(90, stages), 4);
    }

    #[test]
    fn stage3_price_floor_scales_entry_price() {
        assert_eq!(stage3_price_floor(dec!(0.5), dec!(0.8)), dec!(0.4));
    }

    #[test]
    fn exiting_timed_out_respects_timeout() {
        let start = DateTime::from_timestamp(0, 0).unwrap();
        let now = DateTime::from_timestamp(61, 0).unwrap();
        assert!(exiting_timed_out(start, now, chrono::Duration::seconds(60)));
        let now = DateTime::from_timestamp(30, 0).unwrap();
        assert!(!exiting_timed_out(start, now, chrono::Duration::seconds(60)));
    }

    #[test]
    fn is_transient_classifies_balance_and_rate_limit() {
        assert!(is_transient(&GatewayError::InsufficientBalance));
        assert!(is_transient(&GatewayError::RateLimited));
        assert!(!is_transient(&GatewayError::Auth("x".into())));
    }
}
