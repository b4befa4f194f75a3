//! Reward-program configuration and archived daily earnings.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::id::ConditionId;
use super::money::Price;

/// One entry from the exchange's reward-configuration feed (`spec.md` §4.1,
/// §4.2 step 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    condition_id: ConditionId,
    max_spread: Price,
    min_size: Price,
    daily_rate: Price,
}

impl RewardConfig {
    #[must_use]
    pub const fn new(condition_id: ConditionId, max_spread: Price, min_size: Price, daily_rate: Price) -> Self {
        Self {
            condition_id,
            max_spread,
            min_size,
            daily_rate,
        }
    }

    #[must_use]
    pub const fn condition_id(&self) -> &ConditionId {
        &self.condition_id
    }

    #[must_use]
    pub const fn max_spread(&self) -> Price {
        self.max_spread
    }

    #[must_use]
    pub const fn min_size(&self) -> Price {
        self.min_size
    }

    #[must_use]
    pub const fn daily_rate(&self) -> Price {
        self.daily_rate
    }

    #[must_use]
    pub fn meets_min_rate(&self, min_reward_rate: Price) -> bool {
        self.daily_rate >= min_reward_rate
    }
}

/// One day's archived estimated-reward entry, appended on UTC day-rollover
/// (`spec.md` §4.9 step 1) and capped at a 90-day history (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardHistoryEntry {
    date: NaiveDate,
    estimated_reward: Price,
    actual_reward: Option<Price>,
}

impl RewardHistoryEntry {
    #[must_use]
    pub const fn new(date: NaiveDate, estimated_reward: Price) -> Self {
        Self {
            date,
            estimated_reward,
            actual_reward: None,
        }
    }

    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.date
    }

    #[must_use]
    pub const fn estimated_reward(&self) -> Price {
        self.estimated_reward
    }

    #[must_use]
    pub const fn actual_reward(&self) -> Option<Price> {
        self.actual_reward
    }

    /// Back-fill yesterday's actual earnings once the exchange reports them
    /// (`spec.md` §4.9 step 7: hourly fetch of the prior day's earnings).
    pub fn set_actual_reward(&mut self, actual: Price) {
        self.actual_reward = Some(actual);
    }
}

/// Cap `history` at the most recent `max_days` entries by date.
pub fn prune_reward_history(history: &mut Vec<RewardHistoryEntry>, max_days: usize) {
    if history.len() <= max_days {
        return;
    }
    history.sort_by_key(RewardHistoryEntry::date);
    let drop = history.len() - max_days;
    history.drain(0..drop);
}
