//! Risk checks: drawdown/daily-loss circuit breakers and per-market
//! blacklisting (`spec.md` §4.9 step 6, §7).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::core::domain::{ConditionId, Price};

/// Consecutive-cooldown threshold that blacklists a market for rescan
/// (`spec.md` §7: "market-local" circuit breaker).
pub const MAX_CONSECUTIVE_COOLDOWNS: u32 = 3;

/// Consecutive-empty-quote-tick threshold that blacklists a market
/// (`spec.md` §7: "six consecutive empty-quote ticks (30s)").
pub const MAX_EMPTY_QUOTE_TICKS: u32 = 6;

/// Consecutive operation-local error threshold that trips a defensive
/// `cancel_all` (`spec.md` §4.9 step 8, §7).
pub const MAX_CONSECUTIVE_TICK_ERRORS: u32 = 5;

/// Outcome of a risk evaluation pass over current engine state
/// (`spec.md` §7 error taxonomy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskVerdict {
    Ok,
    /// Fatal: drawdown breached. Caller should trigger the kill switch.
    DrawdownBreached { peak: Price, current: Price, percent: f64 },
    /// Session-level transient: daily loss exceeded. Caller sets
    /// `day_paused := true` and cancels all.
    DailyLossExceeded { loss: Price, limit: Price },
}

/// Drawdown check: `(peak - current) / peak > max_drawdown_percent`
/// (`spec.md` §7: "drawdown threshold breached").
#[must_use]
pub fn check_drawdown(peak_balance: Price, current_balance: Price, max_drawdown_percent: f64) -> RiskVerdict {
    if peak_balance <= Price::ZERO {
        return RiskVerdict::Ok;
    }
    let drop = (peak_balance - current_balance).max(Price::ZERO);
    let ratio = drop / peak_balance;
    let percent = ratio_to_f64(ratio);
    if percent > max_drawdown_percent {
        RiskVerdict::DrawdownBreached {
            peak: peak_balance,
            current: current_balance,
            percent,
        }
    } else {
        RiskVerdict::Ok
    }
}

/// Daily-loss check: `daily_pnl < -max_daily_loss` (`spec.md` §7: "daily loss
/// exceeds `max_daily_loss`").
#[must_use]
pub fn check_daily_loss(daily_pnl: Price, max_daily_loss: Price) -> RiskVerdict {
    if daily_pnl < -max_daily_loss {
        RiskVerdict::DailyLossExceeded {
            loss: -daily_pnl,
            limit: max_daily_loss,
        }
    } else {
        RiskVerdict::Ok
    }
}

fn ratio_to_f64(ratio: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    ratio.to_f64().unwrap_or(0.0) * 100.0
}

/// `true` when `consecutive_cooldowns` has reached the blacklist threshold
/// (`spec.md` §4.9/§7: "three consecutive cooldowns -> pause that market").
#[must_use]
pub const fn should_blacklist_for_cooldowns(consecutive_cooldowns: u32) -> bool {
    consecutive_cooldowns >= MAX_CONSECUTIVE_COOLDOWNS
}

/// `true` when `empty_quote_ticks` has reached the blacklist threshold.
#[must_use]
pub const fn should_blacklist_for_empty_quotes(empty_quote_ticks: u32) -> bool {
    empty_quote_ticks >= MAX_EMPTY_QUOTE_TICKS
}

/// `true` when the tick-error streak should trigger a defensive `cancel_all`
/// (`spec.md` §4.9 step 8).
#[must_use]
pub const fn should_trip_error_circuit(consecutive_tick_errors: u32) -> bool {
    consecutive_tick_errors > MAX_CONSECUTIVE_TICK_ERRORS
}

/// A market blacklisted by either circuit breaker, recoverable on a
/// subsequent scan (`spec.md` §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blacklisted {
    pub condition_id: ConditionId,
    pub reason: BlacklistReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistReason {
    ConsecutiveCooldowns,
    EmptyQuoteTicks,
}
