//! Scripted [`ExchangeGateway`] and fixture builders for integration tests.
//!
//! Only compiled behind the `testkit` feature, which `[dev-dependencies]`
//! pulls in via a path dependency on this crate itself. Mirrors the scripted
//! mock pattern used throughout this crate's own inline tests: every
//! response is queued ahead of time, and calls are counted so a test can
//! assert on what the engine actually did, not just on its final state.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal_macros::dec;

use crate::core::domain::{
    BookSnapshot, ConditionId, Market, OrderId, OrderSpec, Price, PriceLevel, RewardConfig, Shares, Token,
    TokenId, TrackedOrder,
};
use crate::core::exchange::{
    ExchangeGateway, GatewayError, MarketMeta, OrderAck, RawOrderBook, RemotePosition, RemoteTrade, Signer,
};

/// A scripted [`ExchangeGateway`]: every method either consults a
/// pre-populated table (order books, market metadata, reward configs) or
/// drains a per-method queue of canned responses. Calls that run out of
/// queued responses fall back to a conservative default rather than
/// panicking, so a test that doesn't care about a given call can ignore it.
pub struct MockGateway {
    collateral_balance: Mutex<Price>,
    conditional_balances: Mutex<HashMap<TokenId, Shares>>,
    order_books: Mutex<HashMap<TokenId, RawOrderBook>>,
    market_metas: Mutex<HashMap<ConditionId, MarketMeta>>,
    reward_configs: Mutex<Vec<RewardConfig>>,
    open_orders: Mutex<Vec<TrackedOrder>>,
    trades: Mutex<VecDeque<RemoteTrade>>,
    remote_positions: Mutex<Vec<RemotePosition>>,

    place_order_results: Mutex<VecDeque<Result<OrderAck, GatewayError>>>,
    redeem_results: Mutex<VecDeque<Result<String, GatewayError>>>,

    placed_orders: Mutex<Vec<OrderSpec>>,
    cancelled_order_ids: Mutex<Vec<OrderId>>,
    cancel_all_count: AtomicU32,
    init_count: AtomicU32,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collateral_balance: Mutex::new(Price::from(1000)),
            conditional_balances: Mutex::new(HashMap::new()),
            order_books: Mutex::new(HashMap::new()),
            market_metas: Mutex::new(HashMap::new()),
            reward_configs: Mutex::new(Vec::new()),
            open_orders: Mutex::new(Vec::new()),
            trades: Mutex::new(VecDeque::new()),
            remote_positions: Mutex::new(Vec::new()),
            place_order_results: Mutex::new(VecDeque::new()),
            redeem_results: Mutex::new(VecDeque::new()),
            placed_orders: Mutex::new(Vec::new()),
            cancelled_order_ids: Mutex::new(Vec::new()),
            cancel_all_count: AtomicU32::new(0),
            init_count: AtomicU32::new(0),
        }
    }

    pub fn set_collateral_balance(&self, balance: Price) {
        *self.collateral_balance.lock() = balance;
    }

    pub fn set_conditional_balance(&self, token: TokenId, shares: Shares) {
        self.conditional_balances.lock().insert(token, shares);
    }

    pub fn set_order_book(&self, book: RawOrderBook) {
        self.order_books.lock().insert(book.token_id.clone(), book);
    }

    pub fn set_market_meta(&self, meta: MarketMeta) {
        self.market_metas.lock().insert(meta.condition_id.clone(), meta);
    }

    pub fn set_reward_configs(&self, configs: Vec<RewardConfig>) {
        *self.reward_configs.lock() = configs;
    }

    pub fn set_remote_positions(&self, positions: Vec<RemotePosition>) {
        *self.remote_positions.lock() = positions;
    }

    pub fn set_open_orders(&self, orders: Vec<TrackedOrder>) {
        *self.open_orders.lock() = orders;
    }

    pub fn set_trades(&self, trades: Vec<RemoteTrade>) {
        *self.trades.lock() = trades.into();
    }

    pub fn queue_place_order_result(&self, result: Result<OrderAck, GatewayError>) {
        self.place_order_results.lock().push_back(result);
    }

    pub fn queue_redeem_result(&self, result: Result<String, GatewayError>) {
        self.redeem_results.lock().push_back(result);
    }

    /// Every [`OrderSpec`] ever submitted through [`create_and_post_order`],
    /// in call order.
    #[must_use]
    pub fn placed_orders(&self) -> Vec<OrderSpec> {
        self.placed_orders.lock().clone()
    }

    #[must_use]
    pub fn cancelled_order_ids(&self) -> Vec<OrderId> {
        self.cancelled_order_ids.lock().clone()
    }

    #[must_use]
    pub fn cancel_all_count(&self) -> u32 {
        self.cancel_all_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn init_count(&self) -> u32 {
        self.init_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn init(&self) -> Result<(), GatewayError> {
        self.init_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_collateral_balance(&self) -> Result<Price, GatewayError> {
        Ok(*self.collateral_balance.lock())
    }

    async fn get_conditional_balance(&self, token: &TokenId) -> Result<Shares, GatewayError> {
        Ok(self.conditional_balances.lock().get(token).copied().unwrap_or(Shares::ZERO))
    }

    async fn get_midpoint(&self, token: &TokenId) -> Result<Price, GatewayError> {
        self.order_books
            .lock()
            .get(token)
            .map(|book| midpoint_of(book))
            .ok_or_else(|| GatewayError::Malformed(format!("no book for {token}")))
    }

    async fn get_midpoints(&self, tokens: &[TokenId]) -> Result<Vec<(TokenId, Price)>, GatewayError> {
        let books = self.order_books.lock();
        Ok(tokens
            .iter()
            .filter_map(|t| books.get(t).map(|book| (t.clone(), midpoint_of(book))))
            .collect())
    }

    async fn get_order_book(&self, token: &TokenId) -> Result<RawOrderBook, GatewayError> {
        self.order_books
            .lock()
            .get(token)
            .cloned()
            .ok_or_else(|| GatewayError::Malformed(format!("no book for {token}")))
    }

    async fn get_order_books(&self, tokens: &[TokenId]) -> Result<Vec<RawOrderBook>, GatewayError> {
        let books = self.order_books.lock();
        Ok(tokens.iter().filter_map(|t| books.get(t).cloned()).collect())
    }

    async fn get_open_orders(&self) -> Result<Vec<TrackedOrder>, GatewayError> {
        Ok(self.open_orders.lock().clone())
    }

    async fn get_trades(&self, _since: Option<DateTime<Utc>>) -> Result<Vec<RemoteTrade>, GatewayError> {
        Ok(self.trades.lock().iter().cloned().collect())
    }

    async fn get_reward_configs(&self) -> Result<Vec<RewardConfig>, GatewayError> {
        Ok(self.reward_configs.lock().clone())
    }

    async fn get_market(&self, condition: &ConditionId) -> Result<MarketMeta, GatewayError> {
        self.market_metas
            .lock()
            .get(condition)
            .cloned()
            .ok_or_else(|| GatewayError::Malformed(format!("no market metadata for {condition}")))
    }

    async fn create_and_post_order(&self, spec: &OrderSpec) -> Result<OrderAck, GatewayError> {
        self.placed_orders.lock().push(spec.clone());
        self.place_order_results.lock().pop_front().unwrap_or_else(|| {
            Ok(OrderAck {
                order_id: OrderId::new(format!("mock-order-{}", self.placed_orders.lock().len())),
                success: true,
            })
        })
    }

    async fn cancel_orders(&self, ids: &[OrderId]) -> Result<(), GatewayError> {
        self.cancelled_order_ids.lock().extend_from_slice(ids);
        Ok(())
    }

    async fn cancel_market_orders(&self, _condition: &ConditionId) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn cancel_all(&self) -> Result<(), GatewayError> {
        self.cancel_all_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn redeem(&self, _condition: &ConditionId, _index_sets: &[u64]) -> Result<String, GatewayError> {
        self.redeem_results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok("0xmockredeem".to_string()))
    }

    async fn get_user_positions_remote(&self) -> Result<Vec<RemotePosition>, GatewayError> {
        Ok(self.remote_positions.lock().clone())
    }
}

/// An `Arc`-sharing handle to a [`MockGateway`] that is itself an
/// [`ExchangeGateway`], so a test can keep its own reference (to inspect
/// `placed_orders`/`cancelled_order_ids`/etc. after the run) while also
/// handing the engine a gateway it owns outright.
#[derive(Clone)]
pub struct SharedMockGateway(pub Arc<MockGateway>);

impl SharedMockGateway {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(MockGateway::new()))
    }
}

impl Default for SharedMockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for SharedMockGateway {
    type Target = MockGateway;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl ExchangeGateway for SharedMockGateway {
    async fn init(&self) -> Result<(), GatewayError> {
        self.0.init().await
    }

    async fn get_collateral_balance(&self) -> Result<Price, GatewayError> {
        self.0.get_collateral_balance().await
    }

    async fn get_conditional_balance(&self, token: &TokenId) -> Result<Shares, GatewayError> {
        self.0.get_conditional_balance(token).await
    }

    async fn get_midpoint(&self, token: &TokenId) -> Result<Price, GatewayError> {
        self.0.get_midpoint(token).await
    }

    async fn get_midpoints(&self, tokens: &[TokenId]) -> Result<Vec<(TokenId, Price)>, GatewayError> {
        self.0.get_midpoints(tokens).await
    }

    async fn get_order_book(&self, token: &TokenId) -> Result<RawOrderBook, GatewayError> {
        self.0.get_order_book(token).await
    }

    async fn get_order_books(&self, tokens: &[TokenId]) -> Result<Vec<RawOrderBook>, GatewayError> {
        self.0.get_order_books(tokens).await
    }

    async fn get_open_orders(&self) -> Result<Vec<TrackedOrder>, GatewayError> {
        self.0.get_open_orders().await
    }

    async fn get_trades(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteTrade>, GatewayError> {
        self.0.get_trades(since).await
    }

    async fn get_reward_configs(&self) -> Result<Vec<RewardConfig>, GatewayError> {
        self.0.get_reward_configs().await
    }

    async fn get_market(&self, condition: &ConditionId) -> Result<MarketMeta, GatewayError> {
        self.0.get_market(condition).await
    }

    async fn create_and_post_order(&self, spec: &OrderSpec) -> Result<OrderAck, GatewayError> {
        self.0.create_and_post_order(spec).await
    }

    async fn cancel_orders(&self, ids: &[OrderId]) -> Result<(), GatewayError> {
        self.0.cancel_orders(ids).await
    }

    async fn cancel_market_orders(&self, condition: &ConditionId) -> Result<(), GatewayError> {
        self.0.cancel_market_orders(condition).await
    }

    async fn cancel_all(&self) -> Result<(), GatewayError> {
        self.0.cancel_all().await
    }

    async fn redeem(&self, condition: &ConditionId, index_sets: &[u64]) -> Result<String, GatewayError> {
        self.0.redeem(condition, index_sets).await
    }

    async fn get_user_positions_remote(&self) -> Result<Vec<RemotePosition>, GatewayError> {
        self.0.get_user_positions_remote().await
    }
}

fn midpoint_of(book: &RawOrderBook) -> Price {
    let best_bid = book.bids.first().map_or(Price::ZERO, PriceLevel::price);
    let best_ask = book.asks.first().map_or(Price::from(1), PriceLevel::price);
    (best_bid + best_ask) / Price::from(2)
}

/// A signer that always succeeds, returning a fixed-length placeholder
/// signature. Order-signing correctness is exercised separately against
/// [`crate::core::exchange::polymarket::LocalKeySigner`].
pub struct NoopSigner;

#[async_trait]
impl Signer for NoopSigner {
    async fn sign_order(&self, _payload: &[u8]) -> Result<Vec<u8>, GatewayError> {
        Ok(vec![0u8; 65])
    }
}

/// Build a two-token [`Market`] fixture with reasonable defaults, overridable
/// through the returned builder-style setters.
#[must_use]
pub fn market_fixture(condition_id: &str) -> Market {
    let yes = Token::new(TokenId::new(format!("{condition_id}-yes")), "Yes", TokenId::new(format!("{condition_id}-no")));
    let no = Token::new(TokenId::new(format!("{condition_id}-no")), "No", TokenId::new(format!("{condition_id}-yes")));
    Market::new(
        ConditionId::new(condition_id),
        format!("Fixture market {condition_id}"),
        yes,
        no,
        dec!(0.05),
        dec!(100),
        dec!(30),
        dec!(0.01),
        false,
        1.0,
    )
}

/// Build a [`BookSnapshot`] fixture from a bid/ask pair, deriving a midpoint
/// and a single price level on each side.
#[must_use]
pub fn book_snapshot_fixture(best_bid: Price, best_ask: Price, size: Shares, now: DateTime<Utc>) -> BookSnapshot {
    let midpoint = (best_bid + best_ask) / Price::from(2);
    BookSnapshot::try_new(
        midpoint,
        best_bid,
        best_ask,
        vec![PriceLevel::new(best_bid, size)],
        vec![PriceLevel::new(best_ask, size)],
        now,
    )
    .expect("fixture bid/ask/midpoint satisfy the book-orientation invariant")
}

/// Build a [`RawOrderBook`] fixture suitable for [`MockGateway::set_order_book`].
#[must_use]
pub fn raw_order_book_fixture(token: &TokenId, best_bid: Price, best_ask: Price, size: Shares, now: DateTime<Utc>) -> RawOrderBook {
    RawOrderBook {
        token_id: token.clone(),
        bids: vec![PriceLevel::new(best_bid, size)],
        asks: vec![PriceLevel::new(best_ask, size)],
        tick_size: dec!(0.01),
        neg_risk: false,
        observed_at: now,
    }
}
