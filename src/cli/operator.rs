//! Handlers for the one-shot operator commands: `active-markets`,
//! `reward-status`, `pause-market`, `resume-market`, `rescan`, `redeem`,
//! `sell-all` (`spec.md` §6: external interfaces).

use std::sync::Arc;

use chrono::Utc;

use crate::app::Config;
use crate::core::domain::ConditionId;
use crate::core::engine::Engine;
use crate::core::exchange::polymarket::{LocalKeySigner, PolymarketGateway};
use crate::core::store::{EngineState, StateStore};
use crate::error::{Error, Result};

async fn build_engine(config: &Config) -> Result<(Engine<PolymarketGateway>, StateStore)> {
    let private_key = config
        .wallet
        .private_key
        .clone()
        .ok_or_else(|| Error::KillSwitch("WALLET_PRIVATE_KEY is not set".into()))?;
    let signer = Arc::new(LocalKeySigner::from_hex(&private_key)?);
    let gateway = PolymarketGateway::new(config.network.api_url.clone(), signer);

    let store = StateStore::new(config.state_path.clone());
    let now = Utc::now();
    let state = store.load().await?.unwrap_or_else(|| EngineState::new(now, now.date_naive()));

    let engine_config = config.trading.to_engine_config();
    let engine = Engine::new(gateway, store.clone(), engine_config, state);
    Ok((engine, store))
}

/// Request a graceful stop of a separately-running `start` process
/// (`spec.md` §6: `stop`). Leaves the sentinel for that process's tick loop
/// to discover and act on; this command does not itself wait for the other
/// process to exit.
pub async fn stop(config_path: &std::path::Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = StateStore::new(config.state_path.clone());
    store.signal_stop().await?;
    println!("stop requested");
    Ok(())
}

/// Request an emergency kill of a separately-running `start` process
/// (`spec.md` §6: `emergency_kill`).
pub async fn emergency_kill(config_path: &std::path::Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = StateStore::new(config.state_path.clone());
    store.signal_kill().await?;
    println!("emergency kill requested");
    Ok(())
}

pub async fn active_markets(config_path: &std::path::Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = StateStore::new(config.state_path.clone());
    let Some(state) = store.load().await? else {
        println!("no state snapshot found");
        return Ok(());
    };
    if state.active_market_ids.is_empty() {
        println!("no active markets");
    }
    for condition in &state.active_market_ids {
        let phase = state.market_states.get(condition).map(|m| m.phase());
        println!("{condition}  phase={phase:?}");
    }
    Ok(())
}

pub async fn reward_status(config_path: &std::path::Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = StateStore::new(config.state_path.clone());
    let Some(state) = store.load().await? else {
        println!("no state snapshot found");
        return Ok(());
    };
    for (condition, history) in &state.reward_history {
        let total_estimated: crate::core::domain::Price = history.iter().map(|e| e.estimated_reward()).sum();
        println!("{condition}  days={}  total_estimated={total_estimated}", history.len());
    }
    Ok(())
}

pub async fn pause_market(config_path: &std::path::Path, condition_id: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = StateStore::new(config.state_path.clone());
    let now = Utc::now();
    let mut state = store.load().await?.unwrap_or_else(|| EngineState::new(now, now.date_naive()));
    let condition = ConditionId::new(condition_id);
    if !state.paused_market_ids.contains(&condition) {
        state.paused_market_ids.push(condition.clone());
    }
    state.market_states.remove(&condition);
    store.save(&state).await?;
    println!("paused {condition}");
    Ok(())
}

pub async fn resume_market(config_path: &std::path::Path, condition_id: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = StateStore::new(config.state_path.clone());
    let now = Utc::now();
    let mut state = store.load().await?.unwrap_or_else(|| EngineState::new(now, now.date_naive()));
    let condition = ConditionId::new(condition_id);
    state.paused_market_ids.retain(|c| c != &condition);
    store.save(&state).await?;
    println!("resumed {condition}, eligible for the next scan");
    Ok(())
}

pub async fn rescan(config_path: &std::path::Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let (engine, store) = build_engine(&config).await?;
    let result = engine.force_rescan(Utc::now()).await?;
    for candidate in &result.ranked {
        println!(
            "{}  score={:.3}  q_min={:.3}",
            candidate.market.condition_id(),
            candidate.score,
            candidate.q_min_own
        );
    }
    store.save(&engine.state_snapshot()).await?;
    Ok(())
}

pub async fn redeem(config_path: &std::path::Path, condition_id: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let (engine, store) = build_engine(&config).await?;
    let condition = ConditionId::new(condition_id);
    let tx_hash = engine.redeem_market(&condition).await?;
    println!("redeemed {condition}: tx {tx_hash}");
    store.save(&engine.state_snapshot()).await?;
    Ok(())
}

pub async fn sell_all(config_path: &std::path::Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let (engine, store) = build_engine(&config).await?;
    engine.liquidate_open_positions().await?;
    store.save(&engine.state_snapshot()).await?;
    println!("liquidation requests sent for all open positions");
    Ok(())
}
