//! Market Feed: two long-lived WebSocket subscriptions dispatching fills and
//! midpoint updates to the engine (`spec.md` §4.8).
//!
//! Connect/subscribe/message-loop shape with a reconnect-with-backoff layer
//! tuned to this program's 1s/doubling/cap-30s policy.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::core::domain::{Price, TokenId};
use crate::core::exchange::polymarket::stream::{
    BookDelta, MarketEvent as WsMarketEvent, MarketSubscribe, PriceChangeEntry, TradeEvent, UserAuth, UserEvent,
    UserSubscribe,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnect/backoff tuning (`spec.md` §4.8: "1s, doubling, capped at 30s").
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub ping_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Event dispatched to the engine from either feed task.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A matched trade fill for a tracked order, deduplicated at the feed.
    Fill {
        trade_id: String,
        token_id: TokenId,
        order_id: Option<String>,
        price: Price,
        size: Price,
    },
    /// A midpoint recomputed after a book delta or price-change update
    /// (`spec.md` §4.8 step 2 final bullet).
    Midpoint { token_id: TokenId, mid: Price },
}

/// Bounded dedup set for user-channel trade notifications (`spec.md` §4.8
/// step 1: cap 1000, prune to 500).
#[derive(Debug, Default)]
pub struct TradeDedup {
    seen: VecDeque<String>,
}

const TRADE_DEDUP_CAP: usize = 1000;
const TRADE_DEDUP_PRUNE_TO: usize = 500;

impl TradeDedup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, key: &str) -> bool {
        if self.seen.iter().any(|k| k == key) {
            return false;
        }
        if self.seen.len() >= TRADE_DEDUP_CAP {
            while self.seen.len() > TRADE_DEDUP_PRUNE_TO {
                self.seen.pop_front();
            }
        }
        self.seen.push_back(key.to_string());
        true
    }
}

/// Per-token best-bid/best-ask tracker driving the book-delta/price-change
/// reconciliation (`spec.md` §4.8 step 2).
#[derive(Debug, Default)]
pub struct BookTracker {
    best_bid: HashMap<TokenId, Decimal>,
    best_ask: HashMap<TokenId, Decimal>,
}

impl BookTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a book delta (bids-only or asks-only), returning a recomputed
    /// midpoint if both sides are now known and non-crossed.
    pub fn apply_delta(&mut self, delta: &BookDelta) -> Option<(TokenId, Price)> {
        let token = TokenId::new(delta.asset_id.clone());

        if let Some(levels) = &delta.bids {
            apply_side(&mut self.best_bid, &token, levels, true);
        }
        if let Some(levels) = &delta.asks {
            apply_side(&mut self.best_ask, &token, levels, false);
        }
        self.midpoint_if_known(&token)
    }

    /// Apply an authoritative `price_change` snapshot (`spec.md` §4.8 step 2,
    /// third bullet: "overwrite the tracked values").
    pub fn apply_price_change(&mut self, entry: &PriceChangeEntry) -> Option<(TokenId, Price)> {
        let token = TokenId::new(entry.asset_id.clone());
        if let (Ok(bid), Ok(ask)) = (entry.best_bid.parse::<Decimal>(), entry.best_ask.parse::<Decimal>()) {
            self.best_bid.insert(token.clone(), bid);
            self.best_ask.insert(token.clone(), ask);
        }
        self.midpoint_if_known(&token)
    }

    fn midpoint_if_known(&self, token: &TokenId) -> Option<(TokenId, Price)> {
        let bid = *self.best_bid.get(token)?;
        let ask = *self.best_ask.get(token)?;
        if ask > bid {
            Some((token.clone(), (bid + ask) / dec!(2)))
        } else {
            None
        }
    }
}

fn apply_side(side: &mut HashMap<TokenId, Decimal>, token: &TokenId, levels: &[crate::core::exchange::polymarket::stream::WsPriceLevel], is_bid: bool) {
    let current = side.get(token).copied();

    let mut best_candidate = current;
    let mut current_wiped = false;

    for level in levels {
        let (Ok(price), Ok(size)) = (level.price.parse::<Decimal>(), level.size.parse::<Decimal>()) else {
            continue;
        };
        let improves = |best: Decimal| if is_bid { price > best } else { price < best };

        if size > Decimal::ZERO {
            best_candidate = Some(match best_candidate {
                Some(best) if !improves(best) => best,
                _ => price,
            });
        } else if Some(price) == current {
            current_wiped = true;
        }
    }

    if current_wiped && best_candidate == current {
        let fallback = levels
            .iter()
            .filter_map(|l| {
                let p = l.price.parse::<Decimal>().ok()?;
                let s = l.size.parse::<Decimal>().ok()?;
                (s > Decimal::ZERO).then_some(p)
            })
            .reduce(|a, b| if is_bid { a.max(b) } else { a.min(b) });
        match fallback {
            Some(p) => {
                side.insert(token.clone(), p);
            }
            None => {
                side.remove(token);
            }
        }
        return;
    }

    if let Some(p) = best_candidate {
        side.insert(token.clone(), p);
    }
}

async fn connect(url: &str) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
    info!(url, "connecting to feed");
    let (ws, response) = connect_async(url).await?;
    info!(status = %response.status(), "feed connected");
    Ok(ws)
}

/// Run the public market-channel feed, dispatching midpoint events to `tx`.
/// Never returns except on `tx` being dropped; reconnects indefinitely.
pub async fn run_market_feed(url: String, tokens: Vec<TokenId>, policy: ReconnectPolicy, tx: mpsc::Sender<FeedEvent>) {
    let mut delay = policy.initial_delay;
    let mut tracker = BookTracker::new();

    loop {
        let ws = match connect(&url).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(error = %e, delay_ms = delay.as_millis(), "market feed connect failed, retrying");
                sleep(delay).await;
                delay = next_delay(delay, policy);
                continue;
            }
        };
        delay = policy.initial_delay;

        if let Err(e) = market_session(ws, &tokens, &mut tracker, &tx, policy).await {
            warn!(error = %e, "market feed session ended, reconnecting");
        }
        if tx.is_closed() {
            return;
        }
        sleep(delay).await;
        delay = next_delay(delay, policy);
    }
}

async fn market_session(
    mut ws: WsStream,
    tokens: &[TokenId],
    tracker: &mut BookTracker,
    tx: &mpsc::Sender<FeedEvent>,
    policy: ReconnectPolicy,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let asset_ids = tokens.iter().map(|t| t.as_str().to_string()).collect();
    let sub = MarketSubscribe::new(asset_ids);
    let json = serde_json::to_string(&sub).unwrap_or_default();
    ws.send(Message::Text(json)).await?;

    let mut ping_at = tokio::time::Instant::now() + policy.ping_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(ping_at) => {
                ws.send(Message::Ping(Vec::new())).await?;
                ping_at = tokio::time::Instant::now() + policy.ping_interval;
            }
            msg = ws.next() => {
                let Some(msg) = msg else { return Ok(()) };
                match msg? {
                    Message::Text(text) => match serde_json::from_str::<WsMarketEvent>(&text) {
                        Ok(WsMarketEvent::Book(delta)) => {
                            if let Some((token, mid)) = tracker.apply_delta(&delta) {
                                let _ = tx.send(FeedEvent::Midpoint { token_id: token, mid }).await;
                            }
                        }
                        Ok(WsMarketEvent::PriceChange(snapshot)) => {
                            for entry in &snapshot.changes {
                                if let Some((token, mid)) = tracker.apply_price_change(entry) {
                                    let _ = tx.send(FeedEvent::Midpoint { token_id: token, mid }).await;
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => debug!(error = %e, "market feed parse error, discarding frame"),
                    },
                    Message::Ping(data) => {
                        ws.send(Message::Pong(data)).await?;
                    }
                    Message::Close(frame) => {
                        info!(frame = ?frame, "market feed closed by server");
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Run the authenticated user-channel feed, dispatching deduplicated fill
/// events to `tx`.
pub async fn run_user_feed(
    url: String,
    auth: UserAuth,
    markets: Vec<String>,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<FeedEvent>,
) {
    let mut delay = policy.initial_delay;
    let mut dedup = TradeDedup::new();

    loop {
        let ws = match connect(&url).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(error = %e, delay_ms = delay.as_millis(), "user feed connect failed, retrying");
                sleep(delay).await;
                delay = next_delay(delay, policy);
                continue;
            }
        };
        delay = policy.initial_delay;

        if let Err(e) = user_session(ws, &auth, &markets, &mut dedup, &tx, policy).await {
            warn!(error = %e, "user feed session ended, reconnecting");
        }
        if tx.is_closed() {
            return;
        }
        sleep(delay).await;
        delay = next_delay(delay, policy);
    }
}

async fn user_session(
    mut ws: WsStream,
    auth: &UserAuth,
    markets: &[String],
    dedup: &mut TradeDedup,
    tx: &mpsc::Sender<FeedEvent>,
    policy: ReconnectPolicy,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let sub = UserSubscribe::new(
        UserAuth {
            api_key: auth.api_key.clone(),
            secret: auth.secret.clone(),
            passphrase: auth.passphrase.clone(),
        },
        markets.to_vec(),
    );
    let json = serde_json::to_string(&sub).unwrap_or_default();
    ws.send(Message::Text(json)).await?;

    let mut ping_at = tokio::time::Instant::now() + policy.ping_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(ping_at) => {
                ws.send(Message::Ping(Vec::new())).await?;
                ping_at = tokio::time::Instant::now() + policy.ping_interval;
            }
            msg = ws.next() => {
                let Some(msg) = msg else { return Ok(()) };
                match msg? {
                    Message::Text(text) => match serde_json::from_str::<UserEvent>(&text) {
                        Ok(UserEvent::Trade(trade)) => dispatch_trade(trade, dedup, tx).await,
                        Ok(_) => {}
                        Err(e) => debug!(error = %e, "user feed parse error, discarding frame"),
                    },
                    Message::Ping(data) => {
                        ws.send(Message::Pong(data)).await?;
                    }
                    Message::Close(frame) => {
                        info!(frame = ?frame, "user feed closed by server");
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn dispatch_trade(trade: TradeEvent, dedup: &mut TradeDedup, tx: &mpsc::Sender<FeedEvent>) {
    if !trade.is_matched() {
        return;
    }
    let key = trade.dedup_key();
    if !dedup.observe(&key) {
        return;
    }
    let (Ok(price), Ok(size)) = (trade.price.parse::<Decimal>(), trade.size.parse::<Decimal>()) else {
        warn!(trade_id = %trade.id, "unparseable trade event, dropping");
        return;
    };
    let event = FeedEvent::Fill {
        trade_id: key,
        token_id: TokenId::new(trade.asset_id),
        order_id: Some(trade.taker_order_id),
        price,
        size,
    };
    if tokio::time::timeout(Duration::from_secs(60), tx.send(event)).await.is_err() {
        error!("fill dispatch timed out after 60s, feed handler may be stuck");
    }
}

fn next_delay(current: Duration, policy: ReconnectPolicy) -> Duration {
    let doubled = current.mul_f64(policy.multiplier);
    doubled.min(policy.max_delay)
}
