//! Startup market selection, orphan-position liquidation, and the
//! operator-triggered sell-all sweep, driven end to end through
//! [`testkit::MockGateway`].

use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;

use scoreguard::core::domain::{order::OrderType, ConditionId, Phase, Position, RewardConfig, Side, TokenId};
use scoreguard::core::engine::{Engine, EngineConfig};
use scoreguard::core::exchange::{MarketMeta, RemotePosition};
use scoreguard::core::quote::QuoteConfig;
use scoreguard::core::scanner::ScanConfig;
use scoreguard::core::store::{EngineState, StateStore};
use scoreguard::testkit::{market_fixture, raw_order_book_fixture, SharedMockGateway};

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        deploy_ratio: dec!(0.8),
        order_size_ratio: dec!(0.2),
        reserve_ratio: dec!(0.1),
        cooldown_ms: 60_000,
        danger_spread_ratio: dec!(0.3),
        max_concurrent_markets: 5,
        max_drawdown_percent: 20.0,
        max_daily_loss: dec!(100),
        quote: QuoteConfig::default(),
        scan: ScanConfig {
            min_reward_rate: dec!(1),
            max_capital_per_market: dec!(1_000),
            min_max_spread: None,
            min_bid_depth_usd: None,
            min_daily_volume: None,
        },
        liquidate_on_stop: false,
        liquidate_on_kill: true,
        cooldown_stability_reset_ms: 300_000,
    }
}

/// Populate the gateway with one reward-eligible market, balanced two-sided
/// books on both legs.
fn seed_rewarded_market(gateway: &SharedMockGateway, condition_id: &str, now: DateTime<Utc>) {
    let market = market_fixture(condition_id);
    let [yes, no] = market.tokens();

    gateway.set_reward_configs(vec![RewardConfig::new(
        ConditionId::new(condition_id),
        market.max_spread(),
        market.min_size(),
        market.daily_rate(),
    )]);
    gateway.set_market_meta(MarketMeta {
        condition_id: ConditionId::new(condition_id),
        question: format!("Fixture market {condition_id}"),
        yes: yes.clone(),
        no: no.clone(),
        active: true,
        end_date: None,
        neg_risk: false,
        tick_size: market.tick_size(),
        daily_volume: None,
    });
    gateway.set_order_book(raw_order_book_fixture(yes.id(), dec!(0.46), dec!(0.50), dec!(500), now));
    gateway.set_order_book(raw_order_book_fixture(no.id(), dec!(0.46), dec!(0.50), dec!(500), now));
}

/// A market with only an order book (no reward config), so the scanner
/// never selects it — used as the orphan target in S5/S6.
fn seed_unrewarded_book(gateway: &SharedMockGateway, condition_id: &str, now: DateTime<Utc>) {
    let market = market_fixture(condition_id);
    let [yes, _no] = market.tokens();
    gateway.set_order_book(raw_order_book_fixture(yes.id(), dec!(0.20), dec!(0.24), dec!(500), now));
}

fn build_engine(
    gateway: SharedMockGateway,
    balance: rust_decimal::Decimal,
    state: EngineState,
) -> Engine<SharedMockGateway> {
    gateway.set_collateral_balance(balance);
    let store = StateStore::new(std::env::temp_dir().join("scoreguard-startup-liquidation-scenarios-unused.json"));
    Engine::new(gateway, store, engine_config(), state)
}

/// S1 — a clean startup cycle: the rewarded market is selected, and initial
/// quotes land on both legs with live orders tracked for each.
#[tokio::test]
async fn startup_places_quotes_on_both_legs_of_the_selected_market() {
    let gateway = SharedMockGateway::new();
    seed_rewarded_market(&gateway, "c1", now());
    let engine = build_engine(gateway, dec!(1_000), EngineState::new(now(), now().date_naive()));

    engine.startup(now()).await.unwrap();

    let snapshot = engine.state_snapshot();
    assert_eq!(snapshot.active_market_ids.len(), 1);
    assert_eq!(engine.active_tokens().len(), 2);

    let condition_id = ConditionId::new("c1");
    let tracked: Vec<_> = snapshot.tracked_orders.iter().filter(|o| o.condition_id() == &condition_id).collect();
    assert_eq!(tracked.len(), 2, "both legs should have a live order tracked");
    assert!(tracked.iter().all(|o| o.is_live()));

    let state = engine.market_state_snapshot(&condition_id).expect("quoting state present");
    assert_eq!(state.phase(), Phase::Quoting);
}

/// S5 — a position held in a market the scanner does not (re)select at
/// startup is an orphan: it gets a FAK sell at the best bid rather than
/// being left to rot.
#[tokio::test]
async fn startup_sells_orphaned_positions_not_reselected_by_the_scanner() {
    let gateway = SharedMockGateway::new();
    seed_rewarded_market(&gateway, "c1", now());
    seed_unrewarded_book(&gateway, "orphan", now());

    let mut state = EngineState::new(now(), now().date_naive());
    let mut position = Position::new(ConditionId::new("orphan"), TokenId::new("orphan-yes"), "Yes");
    position.apply_buy(dec!(50), dec!(0.22));
    state.positions.push(position);

    let engine = build_engine(gateway.clone(), dec!(1_000), state);
    engine.startup(now()).await.unwrap();

    let placed = gateway.placed_orders();
    let orphan_sell = placed
        .iter()
        .find(|o| o.token_id == TokenId::new("orphan-yes"))
        .expect("orphan position should have been sold off at startup");
    assert_eq!(orphan_sell.side, Side::Sell);
    assert_eq!(orphan_sell.size, dec!(50));
    assert_eq!(orphan_sell.price, dec!(0.20));
    assert_eq!(orphan_sell.order_type, OrderType::Fak);

    // The MockGateway doesn't simulate the fill, so the local position is
    // still open right after startup's one-shot sell submission; it's only
    // pruned once `is_flat()` (i.e. once a later tick's `detect_fills`
    // reconciles the actual fill).
    assert!(engine.state_snapshot().positions.iter().any(|p| p.condition_id() == &ConditionId::new("orphan")));
}

/// S6 — the operator `sell-all` command reconciles remote share counts
/// before liquidating, and sweeps every non-flat local position
/// unconditionally, not just the ones in currently-active markets.
#[tokio::test]
async fn liquidate_open_positions_reconciles_and_sells_every_position() {
    let gateway = SharedMockGateway::new();
    seed_rewarded_market(&gateway, "c1", now());
    seed_unrewarded_book(&gateway, "orphan", now());

    let mut state = EngineState::new(now(), now().date_naive());
    let mut position = Position::new(ConditionId::new("orphan"), TokenId::new("orphan-yes"), "Yes");
    position.apply_buy(dec!(50), dec!(0.22));
    state.positions.push(position);

    gateway.set_remote_positions(vec![RemotePosition { token_id: TokenId::new("orphan-yes"), shares: dec!(75) }]);

    let engine = build_engine(gateway.clone(), dec!(1_000), state);
    engine.liquidate_open_positions().await.unwrap();

    let placed = gateway.placed_orders();
    let sell = placed.iter().find(|o| o.token_id == TokenId::new("orphan-yes")).expect("position should be sold");
    assert_eq!(sell.side, Side::Sell);
    // Reconciled against the remote ledger (75), not the stale local 50.
    assert_eq!(sell.size, dec!(75));
    assert_eq!(sell.order_type, OrderType::Fak);
}
