//! State Store: the single persisted snapshot of engine state
//! (`spec.md` §3, §6).
//!
//! Serialized as one JSON document, written atomically via
//! write-to-temp-then-rename, and reloaded with forward-compatible field
//! merging (`serde`'s `#[serde(default)]` on every field added after
//! `schema_version` 1).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::core::domain::{
    ConditionId, FillEvent, MarketState, Position, Price, RewardHistoryEntry, Shares, TrackedOrder,
};
use crate::error::{Error, Result};

/// Bumped whenever a field is added, removed, or reinterpreted. Loader keeps
/// every unknown field defaulted rather than rejecting the document, so an
/// older snapshot always loads under a newer binary.
pub const SCHEMA_VERSION: u32 = 1;

/// The full persisted snapshot (`spec.md` §3: "Engine State (persisted)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    pub running: bool,
    pub start_timestamp: DateTime<Utc>,
    pub collateral_balance: Price,
    pub peak_balance: Price,
    pub daily_pnl: Price,
    pub daily_date: NaiveDate,
    pub total_pnl: Price,

    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub tracked_orders: Vec<TrackedOrder>,
    #[serde(default)]
    pub active_market_ids: Vec<ConditionId>,
    #[serde(default)]
    pub paused_market_ids: Vec<ConditionId>,

    #[serde(default)]
    pub error_count: u32,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub last_scan_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_scoring_check_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_balance_refresh_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_earnings_fetch_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub kill_switch_triggered: bool,
    #[serde(default)]
    pub day_paused: bool,

    #[serde(default)]
    pub reward_history: HashMap<ConditionId, Vec<RewardHistoryEntry>>,
    #[serde(default)]
    pub fill_history: Vec<FillEvent>,
    #[serde(default)]
    pub market_states: HashMap<ConditionId, MarketState>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl EngineState {
    #[must_use]
    pub fn new(now: DateTime<Utc>, today: NaiveDate) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            running: true,
            start_timestamp: now,
            collateral_balance: Price::ZERO,
            peak_balance: Price::ZERO,
            daily_pnl: Price::ZERO,
            daily_date: today,
            total_pnl: Price::ZERO,
            positions: Vec::new(),
            tracked_orders: Vec::new(),
            active_market_ids: Vec::new(),
            paused_market_ids: Vec::new(),
            error_count: 0,
            last_refresh_at: None,
            last_scan_at: None,
            last_scoring_check_at: None,
            last_balance_refresh_at: None,
            last_earnings_fetch_at: None,
            kill_switch_triggered: false,
            day_paused: false,
            reward_history: HashMap::new(),
            fill_history: Vec::new(),
            market_states: HashMap::new(),
        }
    }

    /// Day-rollover bookkeeping: archive the day's reward estimate, reset
    /// daily P&L, clear `day_paused`, drop zero-share positions
    /// (`spec.md` §4.9 step 1).
    pub fn roll_day(&mut self, today: NaiveDate, estimated_reward_by_market: &HashMap<ConditionId, Price>) {
        for (condition, estimate) in estimated_reward_by_market {
            let entry = RewardHistoryEntry::new(self.daily_date, *estimate);
            self.reward_history.entry(condition.clone()).or_default().push(entry);
        }
        for history in self.reward_history.values_mut() {
            crate::core::domain::prune_reward_history(history, 90);
        }
        self.daily_date = today;
        self.daily_pnl = Price::ZERO;
        self.day_paused = false;
        self.positions.retain(|p| !p.is_flat());
    }

    pub fn prune_fill_history(&mut self, now: DateTime<Utc>) {
        crate::core::domain::prune_fill_history(&mut self.fill_history, now, chrono::Duration::hours(2));
    }

    #[must_use]
    pub fn total_position_value(&self, mids: &HashMap<crate::core::domain::TokenId, Price>) -> Shares {
        self.positions
            .iter()
            .map(|p| p.net_shares() * mids.get(p.token_id()).copied().unwrap_or(p.avg_entry_price()))
            .sum()
    }
}

/// Persists and reloads [`EngineState`] as a single atomic JSON document.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the snapshot, returning `None` if no file exists yet (first run).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the file exists but cannot be parsed.
    pub async fn load(&self) -> Result<Option<EngineState>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let state = serde_json::from_slice::<EngineState>(&bytes)
                    .map_err(|e| Error::Store(format!("failed to parse state snapshot: {e}")))?;
                if state.schema_version != SCHEMA_VERSION {
                    info!(
                        found = state.schema_version,
                        expected = SCHEMA_VERSION,
                        "loaded state snapshot from a different schema version"
                    );
                }
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Atomically persist `state`: write to a temp file in the same
    /// directory, then rename over the target (`spec.md` §6: "persisted as a
    /// single atomic snapshot").
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on serialization failure, or [`Error::Io`] if
    /// the write or rename fails.
    pub async fn save(&self, state: &EngineState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| Error::Store(format!("failed to serialize state snapshot: {e}")))?;

        let tmp_path = temp_path(&self.path);
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Request a graceful stop of a separately-running `start` process
    /// (`spec.md` §6: `stop`). There is no IPC channel between the CLI and a
    /// running engine, so the request is a sentinel file next to the state
    /// snapshot that the running loop polls for on every tick.
    pub async fn signal_stop(&self) -> Result<()> {
        tokio::fs::write(control_path(&self.path, "stop"), b"").await?;
        Ok(())
    }

    /// Request an emergency kill of a separately-running `start` process
    /// (`spec.md` §6: `emergency_kill`).
    pub async fn signal_kill(&self) -> Result<()> {
        tokio::fs::write(control_path(&self.path, "kill"), b"").await?;
        Ok(())
    }

    /// Consume a pending stop signal, if one was left by [`Self::signal_stop`].
    pub async fn take_stop_signal(&self) -> bool {
        take_control_signal(&control_path(&self.path, "stop")).await
    }

    /// Consume a pending kill signal, if one was left by [`Self::signal_kill`].
    pub async fn take_kill_signal(&self) -> bool {
        take_control_signal(&control_path(&self.path, "kill")).await
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn control_path(path: &Path, suffix: &str) -> PathBuf {
    let mut control = path.as_os_str().to_owned();
    control.push(".");
    control.push(suffix);
    PathBuf::from(control)
}

async fn take_control_signal(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to clear control signal file");
            false
        }
    }
}
