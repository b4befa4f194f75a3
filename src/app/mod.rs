//! Application layer: configuration, shared state, and the engine's run loop.

pub mod config;
pub mod state;

pub use config::{Config, Environment, LoggingConfig, NetworkConfig, TradingConfig, WalletConfig};
pub use state::ShutdownHandle;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::core::engine::Engine;
use crate::core::exchange::polymarket::{LocalKeySigner, PolymarketGateway};
use crate::core::feed::{self, FeedEvent, ReconnectPolicy};
use crate::core::store::{EngineState, StateStore};
use crate::error::{Error, Result};

/// Wires a configuration into a running [`Engine`] and drives its tick loop
/// until shutdown (`spec.md` §4.9: startup/tick/shutdown sequence).
pub struct App;

impl App {
    /// Run until a Ctrl-C or other external signal triggers `shutdown`.
    pub async fn run(config: Config) -> Result<()> {
        let shutdown = ShutdownHandle::new();
        Self::run_with_shutdown(config, shutdown).await
    }

    /// Run with an externally-owned [`ShutdownHandle`], so a CLI wrapper can
    /// trigger it from a signal handler or an operator command.
    pub async fn run_with_shutdown(config: Config, mut shutdown: ShutdownHandle) -> Result<()> {
        let private_key = config
            .wallet
            .private_key
            .clone()
            .ok_or_else(|| Error::KillSwitch("WALLET_PRIVATE_KEY is not set".into()))?;
        let signer = Arc::new(LocalKeySigner::from_hex(&private_key)?);
        let gateway = PolymarketGateway::new(config.network.api_url.clone(), signer);

        let store = StateStore::new(config.state_path.clone());
        let now = Utc::now();
        let initial_state = store
            .load()
            .await?
            .unwrap_or_else(|| EngineState::new(now, now.date_naive()));

        let engine_config = config.trading.to_engine_config();
        let engine = Arc::new(Engine::new(gateway, store.clone(), engine_config, initial_state));

        info!("scoreguard starting up");
        engine.startup(now).await?;

        // Market feed (`spec.md` §4.8) is an accelerant on top of the
        // REST-driven tick, subscribed once to the markets selected at
        // startup. It does not resubscribe across rescans; a market added
        // mid-run is still covered by the REST refresh every tick, just
        // without the sub-tick midpoint push.
        let (feed_tx, mut feed_rx) = tokio::sync::mpsc::channel::<FeedEvent>(256);
        let feed_tokens = engine.active_tokens();
        let feed_handle = if feed_tokens.is_empty() {
            None
        } else {
            Some(tokio::spawn(feed::run_market_feed(
                config.network.ws_url.clone(),
                feed_tokens,
                ReconnectPolicy::default(),
                feed_tx,
            )))
        };
        let feed_engine = Arc::clone(&engine);
        let feed_forward = tokio::spawn(async move {
            while let Some(event) = feed_rx.recv().await {
                feed_engine.handle_feed_event(event, Utc::now()).await;
            }
        });

        let refresh_interval = Duration::from_millis(config.trading.refresh_interval_ms);
        let mut ticker = tokio::time::interval(refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if store.take_kill_signal().await {
                        warn!("emergency-kill signal received, liquidating and stopping");
                        if let Some(handle) = &feed_handle {
                            handle.abort();
                        }
                        feed_forward.abort();
                        engine.emergency_kill().await?;
                        info!("scoreguard stopped");
                        return Ok(());
                    }
                    if store.take_stop_signal().await {
                        warn!("stop signal received, draining engine");
                        break;
                    }

                    let tick_now = Utc::now();
                    if let Err(e) = engine.tick(tick_now).await {
                        error!(error = %e, "tick failed");
                    }
                    if let Err(e) = store.save(&engine.state_snapshot()).await {
                        error!(error = %e, "failed to persist state snapshot");
                    }
                }
                () = shutdown.wait() => {
                    warn!("shutdown signal received, draining engine");
                    break;
                }
            }
        }

        if let Some(handle) = &feed_handle {
            handle.abort();
        }
        feed_forward.abort();
        engine.shutdown().await?;
        info!("scoreguard stopped");
        Ok(())
    }
}
