//! Engine Loop: the 5 s tick that drives every other `core` component
//! (`spec.md` §4.9).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info, warn};

use crate::core::danger::DangerTriggerMap;
use crate::core::domain::{
    market_state::Phase, AccidentalFill, BookSnapshot, ConditionId, FillEvent, Market, MarketState, OrderId,
    Position, Price, Shares, Side, TokenId,
};
use crate::core::exchange::ExchangeGateway;
use crate::core::order::{self, DetectedFill, FillDedup};
use crate::core::quote::{self, QuoteConfig};
use crate::core::risk::{self, RiskVerdict};
use crate::core::scanner::{self, ScanConfig, ScanResult};
use crate::core::store::{EngineState, StateStore};
use crate::error::Result;

/// Tick cadence (`spec.md` §4.9: "Main tick every 5 s").
pub const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// `exiting` force-to-cooldown timeout (`spec.md` §4.9 step 5, §4.7).
const EXITING_FORCE_TIMEOUT: chrono::Duration = chrono::Duration::seconds(60);

/// `neg_risk` book-inversion divergence threshold (`spec.md` §4.9 step 3).
const NEG_RISK_DIVERGENCE_THRESHOLD: Decimal = dec!(0.3);

/// Periodic-task cadences (`spec.md` §4.9 step 7).
const SCORING_CHECK_INTERVAL: chrono::Duration = chrono::Duration::seconds(60);
const BALANCE_REFRESH_INTERVAL: chrono::Duration = chrono::Duration::minutes(5);
const EARNINGS_FETCH_INTERVAL: chrono::Duration = chrono::Duration::minutes(60);

/// Whether `interval` has elapsed since `last`, treating a never-run task
/// (`None`) as due immediately.
fn due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: chrono::Duration) -> bool {
    match last {
        None => true,
        Some(t) => now - t >= interval,
    }
}

/// Tunable engine parameters drawn from configuration (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub deploy_ratio: Decimal,
    pub order_size_ratio: Decimal,
    pub reserve_ratio: Decimal,
    pub cooldown_ms: i64,
    pub danger_spread_ratio: Decimal,
    pub max_concurrent_markets: usize,
    pub max_drawdown_percent: f64,
    pub max_daily_loss: Price,
    pub quote: QuoteConfig,
    pub scan: ScanConfig,
    pub liquidate_on_stop: bool,
    pub liquidate_on_kill: bool,
    /// How long a market's orders must stand unmolested before
    /// `consecutive_cooldowns` resets to 0 (`spec.md` §9 open question (c)
    /// — a heuristic, so it's a knob rather than a hard-coded constant).
    pub cooldown_stability_reset_ms: i64,
}

/// Capital sizing derived each 5-minute refresh (`spec.md` §4.9: "Capital
/// sizing").
#[derive(Debug, Clone, Copy)]
pub struct Sizing {
    pub order_size: Price,
    pub max_capital_per_market: Price,
}

impl Sizing {
    #[must_use]
    pub fn compute(balance: Price, order_size_ratio: Decimal, deploy_ratio: Decimal) -> Self {
        Self {
            order_size: (balance * order_size_ratio).max(Price::from(1)),
            max_capital_per_market: (balance * deploy_ratio).max(Price::from(1)),
        }
    }
}

/// The running engine: owns the gateway handle, persisted state, and the
/// hot-path danger-trigger map. Cheap to clone the handle fields (`Arc`-like
/// by convention of the caller holding `Engine` behind its own `Arc`).
pub struct Engine<G: ExchangeGateway> {
    gateway: G,
    store: StateStore,
    danger: DangerTriggerMap,
    fill_dedup: RwLock<FillDedup>,
    market_states: RwLock<HashMap<ConditionId, MarketState>>,
    markets: RwLock<HashMap<ConditionId, Market>>,
    book_cache: RwLock<HashMap<TokenId, BookSnapshot>>,
    scan_result: RwLock<ScanResult>,
    state: RwLock<EngineState>,
    sizing: RwLock<Sizing>,
    running: AtomicBool,
    consecutive_tick_errors: AtomicU32,
    config: EngineConfig,
}

impl<G: ExchangeGateway> Engine<G> {
    #[must_use]
    pub fn new(gateway: G, store: StateStore, config: EngineConfig, initial_state: EngineState) -> Self {
        Self {
            gateway,
            store,
            danger: DangerTriggerMap::new(),
            fill_dedup: RwLock::new(FillDedup::new()),
            market_states: RwLock::new(HashMap::new()),
            markets: RwLock::new(HashMap::new()),
            book_cache: RwLock::new(HashMap::new()),
            scan_result: RwLock::new(ScanResult::default()),
            sizing: RwLock::new(Sizing::compute(
                initial_state.collateral_balance,
                config.order_size_ratio,
                config.deploy_ratio,
            )),
            state: RwLock::new(initial_state),
            running: AtomicBool::new(true),
            consecutive_tick_errors: AtomicU32::new(0),
            config,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the persisted engine state, for CLI status reporting.
    #[must_use]
    pub fn state_snapshot(&self) -> EngineState {
        self.state.read().clone()
    }

    /// Every token of every currently-active market, for subscribing the
    /// Market Feed (`spec.md` §4.8).
    #[must_use]
    pub fn active_tokens(&self) -> Vec<TokenId> {
        self.markets.read().values().flat_map(|m| m.tokens().map(|t| t.id().clone())).collect()
    }

    #[must_use]
    pub fn scan_snapshot(&self) -> ScanResult {
        self.scan_result.read().clone()
    }

    /// A single market's phase-machine snapshot, for CLI status reporting
    /// and tests; `None` if the market has no active state (paused or never
    /// selected).
    #[must_use]
    pub fn market_state_snapshot(&self, condition_id: &ConditionId) -> Option<MarketState> {
        self.market_states.read().get(condition_id).cloned()
    }

    /// Run a scan on demand, independent of [`ScanResult::should_rescan`]
    /// (`spec.md` §6: `rescan` operator command).
    pub async fn force_rescan(&self, now: DateTime<Utc>) -> Result<ScanResult> {
        let paused = self.state.read().paused_market_ids.clone();
        let scan = scanner::scan(&self.gateway, &self.scan_config(), now).await?;
        let selected = scan.select_active_markets(&paused, self.config.max_concurrent_markets);
        *self.scan_result.write() = scan.clone();
        self.state.write().last_scan_at = Some(now);
        self.sync_market_states(&selected, now);
        {
            let mut markets = self.markets.write();
            markets.clear();
            for market in &selected {
                markets.insert(market.condition_id().clone(), market.clone());
            }
        }
        self.sync_persisted_market_state();
        Ok(scan)
    }

    /// Scanner config for the next scan, with `max_capital_per_market`
    /// refreshed from the current balance-derived [`Sizing`] rather than the
    /// static value in [`EngineConfig`] (`spec.md` §4.9: "Capital sizing").
    fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            max_capital_per_market: self.sizing.read().max_capital_per_market,
            ..self.config.scan.clone()
        }
    }

    /// Refresh collateral balance, the `peak_balance` watermark, and
    /// balance-derived order sizing (`spec.md` §4.9: "Capital sizing").
    async fn refresh_balance_and_sizing(&self, now: DateTime<Utc>) -> Result<()> {
        let balance = self.gateway.get_collateral_balance().await?;
        {
            let mut state = self.state.write();
            state.collateral_balance = balance;
            state.peak_balance = state.peak_balance.max(balance);
            state.last_balance_refresh_at = Some(now);
        }
        *self.sizing.write() = Sizing::compute(balance, self.config.order_size_ratio, self.config.deploy_ratio);
        Ok(())
    }

    /// Startup sequence (`spec.md` §4.9: "Startup sequence").
    pub async fn startup(&self, now: DateTime<Utc>) -> Result<()> {
        self.gateway.init().await?;
        self.refresh_balance_and_sizing(now).await?;

        self.gateway.cancel_all().await?;
        self.state.write().tracked_orders.clear();

        let scan = scanner::scan(&self.gateway, &self.scan_config(), now).await?;
        let selected = scan.select_active_markets(&[], self.config.max_concurrent_markets);
        *self.scan_result.write() = scan;

        self.sell_orphan_positions(&selected).await?;
        self.prune_stale_positions();
        self.sync_market_states(&selected, now);

        {
            let mut markets = self.markets.write();
            markets.clear();
            for market in &selected {
                markets.insert(market.condition_id().clone(), market.clone());
            }
        }
        self.sync_persisted_market_state();

        for market in &selected {
            if let Err(e) = self.place_initial_quotes(market, now).await {
                warn!(error = %e, condition = %market.condition_id(), "failed to place initial quotes at startup");
            }
        }

        info!(markets = selected.len(), "startup complete");
        Ok(())
    }

    async fn sell_orphan_positions(&self, active: &[Market]) -> Result<()> {
        let active_ids: Vec<ConditionId> = active.iter().map(|m| m.condition_id().clone()).collect();
        let orphans: Vec<Position> = {
            let state = self.state.read();
            state
                .positions
                .iter()
                .filter(|p| !p.is_flat() && !active_ids.contains(p.condition_id()))
                .cloned()
                .collect()
        };
        for position in orphans {
            let book = self.gateway.get_order_book(position.token_id()).await?;
            let Some(best_bid) = book.bids.last().map(|l| l.price()) else {
                continue;
            };
            let sell_price = best_bid.max(dec!(0.01));
            let spec = crate::core::domain::OrderSpec {
                token_id: position.token_id().clone(),
                condition_id: position.condition_id().clone(),
                side: Side::Sell,
                price: sell_price,
                size: position.net_shares(),
                order_type: crate::core::domain::OrderType::Fak,
                post_only: false,
                level: 0,
                scoring: false,
            };
            let _ = self.gateway.create_and_post_order(&spec).await;
        }
        Ok(())
    }

    fn prune_stale_positions(&self) {
        let mut state = self.state.write();
        state.positions.retain(|p| !p.is_flat());
    }

    fn sync_market_states(&self, active: &[Market], now: DateTime<Utc>) {
        let active_ids: Vec<ConditionId> = active.iter().map(|m| m.condition_id().clone()).collect();
        let mut states = self.market_states.write();
        states.retain(|id, _| active_ids.contains(id));
        for market in active {
            states
                .entry(market.condition_id().clone())
                .or_insert_with(|| MarketState::new_quoting(market.condition_id().clone()));
        }
        let _ = now;
    }

    /// Mirror the live `markets`/`market_states` maps into the persisted
    /// [`EngineState`] so a loaded snapshot (CLI `active-markets`, a
    /// restart) reflects what the running engine actually has open, not
    /// just whatever was true as of the last rescan. Called after every
    /// market-set change and at the end of every tick.
    fn sync_persisted_market_state(&self) {
        let active_ids: Vec<ConditionId> = self.markets.read().keys().cloned().collect();
        let states = self.market_states.read().clone();
        let mut state = self.state.write();
        state.active_market_ids = active_ids;
        state.market_states = states;
    }

    async fn place_initial_quotes(&self, market: &Market, now: DateTime<Utc>) -> Result<()> {
        let books = self.fetch_books(market).await?;
        let targets = quote::quotes_for_market(market, &books, self.sizing.read().order_size, &self.config.quote);
        if let Some(state) = self.market_states.write().get_mut(market.condition_id()) {
            if targets.is_empty() {
                state.increment_empty_quote_ticks();
            } else {
                state.reset_empty_quote_ticks();
            }
        }
        let live: Vec<_> = {
            let state = self.state.read();
            state
                .tracked_orders
                .iter()
                .filter(|o| o.condition_id() == market.condition_id())
                .cloned()
                .collect()
        };
        let (live_set, _placed) = order::refresh_market_orders(&self.gateway, market, &live, &targets, now).await;
        let ids: Vec<OrderId> = live_set.iter().map(|o| o.order_id().clone()).collect();
        if let Some(state) = self.market_states.write().get_mut(market.condition_id()) {
            state.set_active_orders(ids, now);
        }
        {
            let mut state = self.state.write();
            state.tracked_orders.retain(|o| o.condition_id() != market.condition_id());
            state.tracked_orders.extend(live_set);
        }
        self.danger
            .update_for_market(market, &self.state.read().tracked_orders, self.config.danger_spread_ratio);
        Ok(())
    }

    async fn fetch_books(&self, market: &Market) -> Result<HashMap<TokenId, BookSnapshot>> {
        let mut out = HashMap::new();
        for token in market.tokens() {
            let raw = self.gateway.get_order_book(token.id()).await?;
            if let (Some(bid), Some(ask)) = (raw.bids.last(), raw.asks.first()) {
                let midpoint = (bid.price() + ask.price()) / dec!(2);
                if let Ok(snap) = BookSnapshot::try_new(midpoint, bid.price(), ask.price(), raw.bids, raw.asks, raw.observed_at) {
                    out.insert(token.id().clone(), snap);
                }
            }
        }
        Ok(out)
    }

    /// One engine tick (`spec.md` §4.9 steps 1-8).
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        match self.tick_inner(now).await {
            Ok(()) => {
                self.consecutive_tick_errors.store(0, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                let count = self.consecutive_tick_errors.fetch_add(1, Ordering::SeqCst) + 1;
                error!(error = %e, consecutive = count, "tick failed");
                if risk::should_trip_error_circuit(count) {
                    warn!("consecutive tick-error circuit tripped, cancelling all orders");
                    let _ = self.gateway.cancel_all().await;
                }
                Err(e)
            }
        }
    }

    async fn tick_inner(&self, now: DateTime<Utc>) -> Result<()> {
        self.maybe_roll_day(now);

        let (kill_switch, day_paused) = {
            let state = self.state.read();
            (state.kill_switch_triggered, state.day_paused)
        };
        if kill_switch || day_paused {
            return Ok(());
        }

        self.refresh_books_and_midpoints(now).await?;
        self.detect_and_dispatch_fills(now).await?;
        self.dispatch_phases(now).await?;
        self.run_risk_checks();
        self.run_periodic_tasks(now).await?;

        // Cooldown/exiting/blacklist transitions above mutate the live
        // `markets`/`market_states` maps directly, outside of
        // `sync_market_states`, so the persisted snapshot needs its own
        // refresh every tick to stay current for `state_snapshot()`/`store.save`.
        self.sync_persisted_market_state();

        Ok(())
    }

    fn maybe_roll_day(&self, now: DateTime<Utc>) {
        let today = now.date_naive();
        let needs_roll = self.state.read().daily_date != today;
        if needs_roll {
            let estimates: HashMap<ConditionId, Price> = self
                .markets
                .read()
                .values()
                .map(|m| (m.condition_id().clone(), m.daily_rate()))
                .collect();
            self.state.write().roll_day(today, &estimates);
        }
    }

    async fn refresh_books_and_midpoints(&self, now: DateTime<Utc>) -> Result<()> {
        let markets: Vec<Market> = self.markets.read().values().cloned().collect();
        let all_tokens: Vec<TokenId> = markets.iter().flat_map(|m| m.tokens().map(|t| t.id().clone())).collect();
        if all_tokens.is_empty() {
            return Ok(());
        }

        let raw_books = self.gateway.get_order_books(&all_tokens).await?;
        let midpoints: HashMap<TokenId, Price> = self
            .gateway
            .get_midpoints(&all_tokens)
            .await
            .map(|v| v.into_iter().collect())
            .unwrap_or_default();

        let mut books: HashMap<TokenId, BookSnapshot> = HashMap::new();
        for raw in raw_books {
            let Some(bid) = raw.bids.last().map(|l| l.price()) else { continue };
            let Some(ask) = raw.asks.first().map(|l| l.price()) else { continue };
            let local_mid = (bid + ask) / dec!(2);
            let Ok(mut snap) = BookSnapshot::try_new(local_mid, bid, ask, raw.bids.clone(), raw.asks.clone(), now)
            else {
                continue;
            };

            if let Some(&reported_mid) = midpoints.get(&raw.token_id) {
                if raw.neg_risk && (reported_mid - local_mid).abs() > NEG_RISK_DIVERGENCE_THRESHOLD {
                    snap = snap.inverted(now);
                } else {
                    snap.set_midpoint(reported_mid);
                }
            } else if raw.neg_risk {
                continue;
            }

            books.insert(raw.token_id, snap);
        }

        *self.book_cache.write() = books;
        self.state.write().last_refresh_at = Some(now);
        Ok(())
    }

    async fn detect_and_dispatch_fills(&self, now: DateTime<Utc>) -> Result<()> {
        let tracked_live: Vec<_> = self.state.read().tracked_orders.iter().filter(|o| o.is_live()).cloned().collect();
        let balances = self.book_balances();
        let (fills, cancelled) = order::detect_fills(&self.gateway, &tracked_live, |t| {
            balances.get(t).copied().unwrap_or(Shares::ZERO)
        })
        .await?;

        for id in cancelled {
            if let Some(tracked) = self.state.write().tracked_orders.iter_mut().find(|o| o.order_id() == &id) {
                tracked.mark_cancelled();
            }
        }

        for fill in fills {
            self.handle_fill(fill, now).await;
        }
        Ok(())
    }

    fn book_balances(&self) -> HashMap<TokenId, Shares> {
        self.state
            .read()
            .positions
            .iter()
            .map(|p| (p.token_id().clone(), p.net_shares()))
            .collect()
    }

    /// Accidental-Fill Handler entry point (`spec.md` §4.7).
    async fn handle_fill(&self, detected: DetectedFill, now: DateTime<Utc>) {
        let dedup_key = (detected.order.order_id().clone(), detected.fill_size);
        if !self.fill_dedup.write().observe(dedup_key) {
            return;
        }

        let condition_id = detected.order.condition_id().clone();
        let Some(market) = self.markets.read().get(&condition_id).cloned() else {
            warn!(condition = %condition_id, "fill for unknown market, ignoring");
            return;
        };

        {
            let mut states = self.market_states.write();
            let Some(market_state) = states.get_mut(&condition_id) else {
                warn!(condition = %condition_id, "fill for market with no state, ignoring");
                return;
            };

            if market_state.phase() == Phase::Exiting {
                if let Some(existing) = market_state.accidental_fill_mut() {
                    if existing.token_id() == detected.order.token_id() {
                        existing.accumulate(detected.fill_size);
                        return;
                    }
                }
            }
        }

        order::cancel_market(&self.gateway, &condition_id).await;
        self.danger.clear_market(&market);

        {
            let mut state = self.state.write();
            let position = state
                .positions
                .iter_mut()
                .find(|p| p.token_id() == detected.order.token_id());
            match (position, detected.order.side()) {
                (Some(p), Side::Buy) => p.apply_buy(detected.fill_size, detected.order.price()),
                (Some(p), Side::Sell) => p.apply_sell(detected.fill_size, detected.order.price()),
                (None, Side::Buy) => {
                    let mut p = Position::new(condition_id.clone(), detected.order.token_id().clone(), "");
                    p.apply_buy(detected.fill_size, detected.order.price());
                    state.positions.push(p);
                }
                (None, Side::Sell) => {}
            }

            state.fill_history.push(FillEvent::new(
                detected.order.order_id().clone(),
                detected.order.token_id().clone(),
                condition_id.clone(),
                detected.order.side(),
                detected.order.price(),
                detected.fill_size,
                now,
            ));
        }

        if detected.order.side() != Side::Buy {
            return;
        }

        let fill_record = AccidentalFill::new(
            detected.order.token_id().clone(),
            detected.fill_size,
            detected.order.price(),
            now,
            crate::core::exit::IMMEDIATE_SELL_STAGE,
        );
        {
            let mut states = self.market_states.write();
            if let Some(market_state) = states.get_mut(&condition_id) {
                if market_state.enter_exiting(fill_record).is_err() {
                    return;
                }
            }
        }

        let accidental_fill = {
            let states = self.market_states.read();
            states.get(&condition_id).and_then(MarketState::accidental_fill).cloned()
        };
        if let Some(accidental_fill) = accidental_fill {
            let outcome = crate::core::exit::immediate_sell(&self.gateway, &market, &accidental_fill).await;
            if let Some((price, sold)) = outcome {
                let mut state = self.state.write();
                if let Some(p) = state.positions.iter_mut().find(|p| p.token_id() == detected.order.token_id()) {
                    p.apply_sell(sold, price);
                }
            }
        }

        let mut states = self.market_states.write();
        if let Some(market_state) = states.get_mut(&condition_id) {
            market_state.exit_to_cooldown(now, self.config.cooldown_ms);
        }
    }

    /// Apply a push event from the Market Feed between ticks (`spec.md`
    /// §4.8). A midpoint update refines the cached book and is checked
    /// against the danger-trigger map immediately — this is the hot path
    /// the map in `core::danger` is precomputed for, so a crossing is
    /// caught here rather than waiting out the rest of the 5 s tick; a fill
    /// is routed through the same [`Self::handle_fill`] entry point the
    /// REST fallback uses, so whichever source notices first wins and the
    /// other is a dedup no-op.
    pub async fn handle_feed_event(&self, event: crate::core::feed::FeedEvent, now: DateTime<Utc>) {
        match event {
            crate::core::feed::FeedEvent::Midpoint { token_id, mid } => {
                if let Some(snap) = self.book_cache.write().get_mut(&token_id) {
                    snap.set_midpoint(mid);
                }
                if self.danger.check(&token_id, mid) {
                    let market = self.markets.read().values().find(|m| m.tokens().iter().any(|t| t.id() == &token_id)).cloned();
                    if let Some(market) = market {
                        let quoting = self
                            .market_states
                            .read()
                            .get(market.condition_id())
                            .is_some_and(|s| s.phase() == Phase::Quoting);
                        if quoting {
                            self.trip_danger_cooldown(&market, now).await;
                        }
                    }
                }
            }
            crate::core::feed::FeedEvent::Fill { token_id, order_id, size, .. } => {
                let tracked = {
                    let state = self.state.read();
                    order_id
                        .as_ref()
                        .and_then(|id| state.tracked_orders.iter().find(|o| o.order_id().as_str() == id).cloned())
                        .or_else(|| state.tracked_orders.iter().find(|o| o.is_live() && o.token_id() == &token_id).cloned())
                };
                let Some(order) = tracked else {
                    warn!(token = %token_id, "feed fill for untracked order, leaving to REST fallback");
                    return;
                };
                self.handle_fill(DetectedFill { order, fill_size: size }, now).await;
            }
        }
    }

    async fn dispatch_phases(&self, now: DateTime<Utc>) -> Result<()> {
        let markets: Vec<Market> = self.markets.read().values().cloned().collect();
        for market in &markets {
            let phase = self
                .market_states
                .read()
                .get(market.condition_id())
                .map(MarketState::phase);
            let Some(phase) = phase else { continue };

            match phase {
                Phase::Quoting => self.dispatch_quoting(market, now).await?,
                Phase::Cooldown => self.dispatch_cooldown(market, now).await,
                Phase::Exiting => self.dispatch_exiting(market, now),
            }
        }
        Ok(())
    }

    /// Synchronous phase write to `cooldown` followed by the cancel RPC
    /// (`spec.md` §9: "per-market phase guard must be a synchronous write
    /// before any await"). Shared by the tick's own REST-driven danger
    /// check and the feed's sub-tick push path, so whichever source
    /// notices the crossing first wins.
    async fn trip_danger_cooldown(&self, market: &Market, now: DateTime<Utc>) {
        let condition_id = market.condition_id().clone();
        let mids: HashMap<TokenId, Price> = market
            .tokens()
            .iter()
            .filter_map(|t| self.book_cache.read().get(t.id()).map(|b| (t.id().clone(), b.midpoint())))
            .collect();
        let mut states = self.market_states.write();
        if let Some(state) = states.get_mut(&condition_id) {
            let _ = state.enter_cooldown(now, self.config.cooldown_ms, mids);
        }
        drop(states);
        order::cancel_market(&self.gateway, &condition_id).await;
        self.danger.clear_market(market);
    }

    async fn dispatch_quoting(&self, market: &Market, now: DateTime<Utc>) -> Result<()> {
        let condition_id = market.condition_id().clone();
        let has_live_order = self
            .state
            .read()
            .tracked_orders
            .iter()
            .any(|o| o.condition_id() == &condition_id && o.is_live());

        let danger_fires = market
            .tokens()
            .iter()
            .any(|t| {
                let mid = self.book_cache.read().get(t.id()).map(BookSnapshot::midpoint);
                self.danger.rest_fallback_fires(t.id(), has_live_order, mid)
            });

        if danger_fires {
            self.trip_danger_cooldown(market, now).await;
            return Ok(());
        }

        let stability_window = chrono::Duration::milliseconds(self.config.cooldown_stability_reset_ms);
        let (active_empty, stale) = {
            let states = self.market_states.read();
            states.get(&condition_id).map_or((true, true), |s| {
                let stale = s
                    .orders_placed_at()
                    .map_or(true, |t| now.signed_duration_since(t) > stability_window);
                (s.active_order_ids().is_empty(), stale)
            })
        };

        if active_empty || stale {
            self.place_initial_quotes(market, now).await?;
            if stale {
                // Orders stood for a full stability window without
                // triggering a cooldown — that's the "proof of stability"
                // the spec calls for, so the streak resets here.
                if let Some(state) = self.market_states.write().get_mut(&condition_id) {
                    state.reset_consecutive_cooldowns();
                }
            }

            let empty_ticks = self
                .market_states
                .read()
                .get(&condition_id)
                .map_or(0, MarketState::empty_quote_ticks);

            if risk::should_blacklist_for_empty_quotes(empty_ticks) {
                self.state.write().paused_market_ids.push(condition_id.clone());
                self.market_states.write().remove(&condition_id);
                self.markets.write().remove(&condition_id);
                info!(condition = %condition_id, "market blacklisted after repeated empty-quote ticks");
            }
        }
        Ok(())
    }

    async fn dispatch_cooldown(&self, market: &Market, now: DateTime<Utc>) {
        let condition_id = market.condition_id().clone();
        let deadline = self
            .market_states
            .read()
            .get(&condition_id)
            .and_then(MarketState::cooldown_until);
        let Some(deadline) = deadline else { return };
        if now <= deadline {
            return;
        }

        let consecutive = self
            .market_states
            .read()
            .get(&condition_id)
            .map_or(0, MarketState::consecutive_cooldowns);

        if risk::should_blacklist_for_cooldowns(consecutive) {
            self.state.write().paused_market_ids.push(condition_id.clone());
            self.market_states.write().remove(&condition_id);
            self.markets.write().remove(&condition_id);
            info!(condition = %condition_id, "market blacklisted after repeated cooldowns");
            return;
        }

        let still_ranked = self
            .scan_result
            .read()
            .ranked
            .iter()
            .any(|c| c.market.condition_id() == &condition_id);

        if still_ranked {
            if let Some(state) = self.market_states.write().get_mut(&condition_id) {
                let _ = state.resume_quoting();
            }
        } else {
            self.market_states.write().remove(&condition_id);
            self.markets.write().remove(&condition_id);
        }
    }

    fn dispatch_exiting(&self, market: &Market, now: DateTime<Utc>) {
        let condition_id = market.condition_id().clone();
        let mut states = self.market_states.write();
        let Some(state) = states.get_mut(&condition_id) else { return };
        if state.accidental_fill().is_none() {
            state.exit_to_cooldown(now, self.config.cooldown_ms);
            return;
        }
        let timed_out = state
            .accidental_fill()
            .is_some_and(|f| crate::core::exit::exiting_timed_out(f.fill_timestamp(), now, EXITING_FORCE_TIMEOUT));
        if timed_out {
            state.exit_to_cooldown(now, self.config.cooldown_ms);
        }
    }

    fn run_risk_checks(&self) {
        let (peak, current, daily_pnl) = {
            let state = self.state.read();
            (state.peak_balance, state.collateral_balance, state.daily_pnl)
        };

        match risk::check_drawdown(peak, current, self.config.max_drawdown_percent) {
            RiskVerdict::DrawdownBreached { percent, .. } => {
                error!(percent, "drawdown threshold breached, triggering kill switch");
                self.state.write().kill_switch_triggered = true;
                return;
            }
            RiskVerdict::Ok | RiskVerdict::DailyLossExceeded { .. } => {}
        }

        if let RiskVerdict::DailyLossExceeded { loss, limit } = risk::check_daily_loss(daily_pnl, self.config.max_daily_loss) {
            warn!(%loss, %limit, "daily loss limit exceeded, pausing for the day");
            self.state.write().day_paused = true;
        }
    }

    /// Every four cadences named in `spec.md` §4.9 step 7, independently of
    /// each other and of the 5 s tick they're checked from.
    async fn run_periodic_tasks(&self, now: DateTime<Utc>) -> Result<()> {
        if due(self.state.read().last_scoring_check_at, now, SCORING_CHECK_INTERVAL) {
            self.run_scoring_checks(now);
        }

        if due(self.state.read().last_balance_refresh_at, now, BALANCE_REFRESH_INTERVAL) {
            self.refresh_balance_and_sizing(now).await?;
        }

        if self.scan_result.read().should_rescan(now) {
            self.force_rescan(now).await?;
        }

        if due(self.state.read().last_earnings_fetch_at, now, EARNINGS_FETCH_INTERVAL) {
            self.run_earnings_fetch(now);
        }

        Ok(())
    }

    /// Re-evaluate each active market's `Q_min` against its current book, so
    /// a reward-eligibility regression (own liquidity crowded out since the
    /// last scan) shows up in logs well before the next scheduled rescan.
    fn run_scoring_checks(&self, now: DateTime<Utc>) {
        let markets: Vec<Market> = self.markets.read().values().cloned().collect();
        let books = self.book_cache.read();
        for market in &markets {
            let [own, complement] = market.tokens();
            let (Some(own_book), Some(complement_book)) = (books.get(own.id()), books.get(complement.id())) else {
                continue;
            };
            let q = quote::scoring::q_min(own_book, complement_book, market.max_spread());
            info!(condition = %market.condition_id(), q_min = q, "scoring check");
        }
        drop(books);
        self.state.write().last_scoring_check_at = Some(now);
    }

    /// Fetch yesterday's realized maker-rebate payout per active market and
    /// backfill it onto the matching `RewardHistoryEntry` (`spec.md` §4.9
    /// step 7: "fetch actual daily earnings for yesterday").
    ///
    /// `ExchangeGateway` has no reward-distribution endpoint today, only
    /// `get_reward_configs` (program parameters, not a paid-out amount), so
    /// this cadence only timestamps itself for now. Wire up the real fetch
    /// once such an endpoint exists on the gateway trait.
    fn run_earnings_fetch(&self, now: DateTime<Utc>) {
        warn!("actual daily earnings fetch is not wired up: no reward-payout endpoint on ExchangeGateway yet");
        self.state.write().last_earnings_fetch_at = Some(now);
    }

    /// Shutdown sequence (`spec.md` §4.9: "Shutdown").
    pub async fn shutdown(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        for market in self.markets.read().values() {
            self.danger.clear_market(market);
        }
        // `spec.md` line 325: an order placement racing this shutdown may
        // still be in flight when `running` flips, so give it a moment to
        // land before the final sweep cancels it.
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        self.gateway.cancel_all().await?;
        if self.config.liquidate_on_stop {
            self.liquidate_all().await?;
        }
        self.store.save(&self.state.read().clone()).await?;
        Ok(())
    }

    /// Emergency kill switch: shutdown plus forced liquidation retries
    /// (`spec.md` §6: `emergency_kill`).
    pub async fn emergency_kill(&self) -> Result<()> {
        self.state.write().kill_switch_triggered = true;
        self.running.store(false, Ordering::SeqCst);
        // `spec.md` line 325: same pre-cancel grace period as `shutdown`, so
        // an order already racing to the exchange has a chance to land
        // before the kill switch sweeps it away.
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        let _ = self.gateway.cancel_all().await;
        if self.config.liquidate_on_kill {
            for attempt in 0..3 {
                if self.liquidate_all().await.is_ok() {
                    break;
                }
                warn!(attempt, "emergency liquidation attempt failed, retrying");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
        self.store.save(&self.state.read().clone()).await?;
        Ok(())
    }

    /// Public wrapper around [`Self::liquidate_all`] for operator tooling
    /// that is not already inside `emergency_kill` (`spec.md` §6: `sell-all`
    /// operator command: "unconditional market-price liquidation of every
    /// token the account holds, including orphans discovered via
    /// `get_user_positions_remote`").
    pub async fn liquidate_open_positions(&self) -> Result<()> {
        self.reconcile_remote_positions().await?;
        self.liquidate_all().await
    }

    /// Reconcile locally-tracked share counts against the exchange's own
    /// position ledger before a `sell-all` sweep, so drift between local
    /// state and the account (missed fills, manual trades) doesn't leave
    /// shares unsold. A remote token with no local position has no
    /// `condition_id` the gateway trait can recover for us, so it is
    /// logged rather than silently dropped.
    async fn reconcile_remote_positions(&self) -> Result<()> {
        let remote = self.gateway.get_user_positions_remote().await?;
        let mut state = self.state.write();
        for remote_position in remote {
            match state.positions.iter_mut().find(|p| p.token_id() == &remote_position.token_id) {
                Some(local) => local.reconcile_remote_shares(remote_position.shares),
                None => warn!(
                    token = %remote_position.token_id,
                    shares = %remote_position.shares,
                    "remote position has no local condition mapping, skipping in liquidation sweep"
                ),
            }
        }
        Ok(())
    }

    /// Attempt on-chain redemption of a resolved market's conditional
    /// tokens (`spec.md` §6: `redeem` operator command). Binary markets use
    /// index sets `[1, 2]` for the YES/NO outcome split.
    pub async fn redeem_market(&self, condition: &ConditionId) -> Result<String> {
        let tx_hash = self.gateway.redeem(condition, &[1, 2]).await?;
        Ok(tx_hash)
    }

    async fn liquidate_all(&self) -> Result<()> {
        let positions: Vec<Position> = self.state.read().positions.iter().filter(|p| !p.is_flat()).cloned().collect();
        for position in positions {
            let book = self.gateway.get_order_book(position.token_id()).await?;
            let Some(best_bid) = book.bids.last().map(|l| l.price()) else { continue };
            let spec = crate::core::domain::OrderSpec {
                token_id: position.token_id().clone(),
                condition_id: position.condition_id().clone(),
                side: Side::Sell,
                price: best_bid.max(dec!(0.01)),
                size: position.net_shares(),
                order_type: crate::core::domain::OrderType::Fak,
                post_only: false,
                level: 0,
                scoring: false,
            };
            let _ = self.gateway.create_and_post_order(&spec).await;
        }
        Ok(())
    }
}
