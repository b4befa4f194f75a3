//! Danger-trigger and accidental-fill scenarios driven end to end through
//! [`testkit::MockGateway`].

use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;

use scoreguard::core::domain::{ConditionId, Phase, RewardConfig, TokenId};
use scoreguard::core::engine::{Engine, EngineConfig};
use scoreguard::core::exchange::MarketMeta;
use scoreguard::core::feed::FeedEvent;
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
        danger_spread_ratio: dec!(0.55),
        max_concurrent_markets: 5,
        max_drawdown_percent: 20.0,
        max_daily_loss: dec!(100),
        quote: QuoteConfig { spread_ratio: dec!(0.85), single_sided: false, min_ticks_from_mid: 1 },
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

/// S1/S2 fixture: one reward-eligible market, YES mid 0.60 (0.57/0.63), NO
/// mid 0.40 (0.37/0.43), `max_spread = 0.05`.
fn seed_market(gateway: &MockGateway, condition_id: &str, now: DateTime<Utc>) {
    let market = market_fixture(condition_id);
    let [yes, no] = market.tokens();

    gateway.set_reward_configs(vec![RewardConfig::new(
        ConditionId::new(condition_id),
        dec!(0.05),
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
    gateway.set_order_book(raw_order_book_fixture(yes.id(), dec!(0.57), dec!(0.63), dec!(500), now));
    gateway.set_order_book(raw_order_book_fixture(no.id(), dec!(0.37), dec!(0.43), dec!(500), now));
}

fn build_engine(gateway: MockGateway) -> Engine<MockGateway> {
    gateway.set_collateral_balance(dec!(500));
    let store = StateStore::new(std::env::temp_dir().join("scoreguard-danger-fill-scenarios-unused.json"));
    let state = EngineState::new(now(), now().date_naive());
    Engine::new(gateway, store, engine_config(), state)
}

/// S2 — a feed midpoint push that crosses `p + danger_spread` must be caught
/// on the very next tick: synchronous phase write to `cooldown`, both legs'
/// orders cancelled, `consecutive_cooldowns` bumped to 1.
#[tokio::test]
async fn danger_trigger_via_feed_enters_cooldown_and_cancels_both_legs() {
    let gateway = MockGateway::new();
    seed_market(&gateway, "c1", now());
    let engine = build_engine(gateway);
    engine.startup(now()).await.unwrap();
    assert!(!engine.state_snapshot().tracked_orders.is_empty());

    // The YES buy rests at roughly mid - max_spread * spread_ratio (~0.5575,
    // floored to tick), so `cancel_below_mid` sits a little above that. A
    // push down to 0.50 is comfortably below threshold regardless of the
    // exact tick-floored order price.
    let yes_token = TokenId::new("c1-yes");
    engine
        .handle_feed_event(FeedEvent::Midpoint { token_id: yes_token, mid: dec!(0.50) }, now())
        .await;

    let market_state = engine.market_state_snapshot(&ConditionId::new("c1")).expect("market still tracked");
    assert_eq!(market_state.phase(), Phase::Cooldown);

    let tick_time = now() + chrono::Duration::seconds(5);
    engine.tick(tick_time).await.unwrap();

    let condition_id = ConditionId::new("c1");
    let market_state = engine.market_state_snapshot(&condition_id).expect("market still tracked");
    assert_eq!(market_state.phase(), Phase::Cooldown);

    // A second, simultaneous push at the same tick must not fire a redundant
    // cancel: the market is already out of `Quoting`, so `dispatch_quoting`
    // (the only path that can call `enter_cooldown`) is no longer reached.
    let before = market_state.consecutive_cooldowns();
    engine.tick(tick_time + chrono::Duration::seconds(5)).await.unwrap();
    let after = engine.market_state_snapshot(&condition_id).unwrap().consecutive_cooldowns();
    assert_eq!(before, after);
    assert_eq!(after, 1);
}

/// S4 — an accidental fill on a live BUY triggers the canonical
/// `immediate_sell` exit (`spec.md` §9 open question (a)): the position is
/// bought then sold back out in the same handler, and the market is back in
/// `cooldown`, not left sitting in `exiting`, once the settled balance is
/// confirmed and the FAK sell lands.
#[tokio::test]
async fn accidental_fill_is_unwound_by_immediate_sell() {
    let gateway = MockGateway::new();
    seed_market(&gateway, "c1", now());
    // Settle instantly: `immediate_sell`'s balance poll succeeds on its
    // first check, so the test never actually sleeps.
    gateway.set_conditional_balance(TokenId::new("c1-yes"), dec!(1_000));
    let engine = build_engine(gateway);
    engine.startup(now()).await.unwrap();

    let filled = engine
        .state_snapshot()
        .tracked_orders
        .iter()
        .find(|o| o.token_id() == &TokenId::new("c1-yes"))
        .cloned()
        .expect("startup placed a YES buy order");

    engine
        .handle_feed_event(
            FeedEvent::Fill {
                trade_id: "t1".into(),
                token_id: filled.token_id().clone(),
                order_id: Some(filled.order_id().as_str().to_string()),
                price: filled.price(),
                size: filled.original_size(),
            },
            now(),
        )
        .await;

    let condition_id = ConditionId::new("c1");
    let market_state = engine.market_state_snapshot(&condition_id).expect("market still tracked");
    assert_eq!(market_state.phase(), Phase::Cooldown);
    assert!(market_state.accidental_fill().is_none());

    let state = engine.state_snapshot();
    let position = state.positions.iter().find(|p| p.token_id() == filled.token_id()).expect("position recorded");
    assert!(position.is_flat());
    let realized_pnl = position.realized_pnl();

    // Re-delivering the identical fill (e.g. the REST fallback catching up
    // behind the feed) must be a dedup no-op, not a second buy-then-sell.
    engine
        .handle_feed_event(
            FeedEvent::Fill {
                trade_id: "t1-rest".into(),
                token_id: filled.token_id().clone(),
                order_id: Some(filled.order_id().as_str().to_string()),
                price: filled.price(),
                size: filled.original_size(),
            },
            now(),
        )
        .await;
    let position_after = engine
        .state_snapshot()
        .positions
        .iter()
        .find(|p| p.token_id() == filled.token_id())
        .cloned()
        .unwrap();
    assert!(position_after.is_flat());
    assert_eq!(position_after.realized_pnl(), realized_pnl);
}

/// S3 — three consecutive cooldown cycles on the same market blacklist it:
/// `paused_market_ids` gains the condition, and it drops out of the active
/// market/token set entirely, rather than resuming a fourth time
/// (`spec.md` §7: `MAX_CONSECUTIVE_COOLDOWNS`).
#[tokio::test]
async fn three_consecutive_cooldowns_blacklist_the_market() {
    let gateway = MockGateway::new();
    seed_market(&gateway, "c1", now());
    let engine = build_engine(gateway);
    engine.startup(now()).await.unwrap();

    let condition_id = ConditionId::new("c1");
    let yes_token = TokenId::new("c1-yes");
    let mut t = now();

    for round in 1..=3u32 {
        engine.handle_feed_event(FeedEvent::Midpoint { token_id: yes_token.clone(), mid: dec!(0.50) }, t).await;
        let state = engine.market_state_snapshot(&condition_id).expect("still tracked before blacklist");
        assert_eq!(state.phase(), Phase::Cooldown);
        assert_eq!(state.consecutive_cooldowns(), round);

        // Past the 60s cooldown window: the next tick resumes quoting,
        // unless this was the third strike, which blacklists instead.
        t += chrono::Duration::seconds(61);
        engine.tick(t).await.unwrap();

        if round < 3 {
            // One more tick to replace the (cleared-on-cooldown) quotes and
            // recompute the danger threshold before the next feed push.
            t += chrono::Duration::seconds(5);
            engine.tick(t).await.unwrap();
        }
    }

    assert!(engine.market_state_snapshot(&condition_id).is_none());
    assert!(engine.active_tokens().is_empty());
    assert!(engine.state_snapshot().paused_market_ids.contains(&condition_id));
}
