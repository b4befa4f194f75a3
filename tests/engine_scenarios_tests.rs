//! End-to-end engine scenarios driven through [`testkit::MockGateway`],
//! exercising startup market selection, initial quote placement, periodic
//! capital resizing, and the Market Feed push path.

use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;

use scoreguard::core::domain::{ConditionId, Price, RewardConfig, TokenId};
use scoreguard::core::engine::{Engine, EngineConfig, Sizing};
use scoreguard::core::exchange::MarketMeta;
use scoreguard::core::quote::QuoteConfig;
use scoreguard::core::scanner::ScanConfig;
use scoreguard::core::store::{EngineState, StateStore};
use scoreguard::testkit::{market_fixture, raw_order_book_fixture, MockGateway};

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

/// Populate the gateway with one reward-eligible market: a reward config,
/// matching market metadata, and a two-sided order book for each leg.
fn seed_one_market(gateway: &MockGateway, condition_id: &str, now: DateTime<Utc>) {
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

fn build_engine(gateway: MockGateway, balance: Price) -> Engine<MockGateway> {
    gateway.set_collateral_balance(balance);
    let store = StateStore::new(std::env::temp_dir().join("scoreguard-engine-scenarios-unused.json"));
    let state = EngineState::new(now(), now().date_naive());
    Engine::new(gateway, store, engine_config(), state)
}

#[tokio::test]
async fn startup_selects_market_and_places_initial_quotes() {
    let gateway = MockGateway::new();
    seed_one_market(&gateway, "c1", now());
    let engine = build_engine(gateway, dec!(1_000));

    engine.startup(now()).await.unwrap();

    let snapshot = engine.state_snapshot();
    assert_eq!(snapshot.active_market_ids.len(), 1);
    assert_eq!(engine.active_tokens().len(), 2);
}

#[tokio::test]
async fn periodic_balance_refresh_runs_on_the_five_minute_cadence() {
    let gateway = MockGateway::new();
    seed_one_market(&gateway, "c1", now());
    let engine = build_engine(gateway, dec!(1_000));
    engine.startup(now()).await.unwrap();
    assert!(engine.state_snapshot().last_balance_refresh_at.is_some());

    // Within the cadence: no second refresh timestamp update is observable
    // from here (it's the same instant either way), so just confirm the
    // tick succeeds without the scan/resize cadences interfering.
    let soon = now() + chrono::Duration::minutes(1);
    engine.tick(soon).await.unwrap();

    let later = now() + chrono::Duration::minutes(6);
    engine.tick(later).await.unwrap();
    let snapshot = engine.state_snapshot();
    assert_eq!(snapshot.last_balance_refresh_at, Some(later));
    assert_eq!(snapshot.peak_balance, dec!(1000));
}

#[test]
fn sizing_formula_matches_periodic_refresh_expectations() {
    let sizing = Sizing::compute(dec!(400), dec!(0.2), dec!(0.8));
    assert_eq!(sizing.order_size, dec!(80));
    assert_eq!(sizing.max_capital_per_market, dec!(320));
}

#[tokio::test]
async fn feed_midpoint_event_does_not_panic_for_untracked_token() {
    let gateway = MockGateway::new();
    seed_one_market(&gateway, "c1", now());
    let engine = build_engine(gateway, dec!(1_000));
    engine.startup(now()).await.unwrap();

    engine
        .handle_feed_event(
            scoreguard::core::feed::FeedEvent::Midpoint { token_id: TokenId::new("nonexistent"), mid: dec!(0.5) },
            now(),
        )
        .await;
}

#[tokio::test]
async fn feed_fill_event_for_untracked_order_is_a_noop() {
    let gateway = MockGateway::new();
    seed_one_market(&gateway, "c1", now());
    let engine = build_engine(gateway, dec!(1_000));
    engine.startup(now()).await.unwrap();

    let before = engine.state_snapshot().positions.len();
    engine
        .handle_feed_event(
            scoreguard::core::feed::FeedEvent::Fill {
                trade_id: "t1".into(),
                token_id: TokenId::new("c1-yes"),
                order_id: Some("no-such-order".into()),
                price: dec!(0.46),
                size: dec!(10),
            },
            now(),
        )
        .await;
    assert_eq!(engine.state_snapshot().positions.len(), before);
}
