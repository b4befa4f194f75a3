//! Polymarket WebSocket wire types: subscription frames and incoming events
//! for the authenticated user channel and the public market channel
//! (`spec.md` §4.8, §6).

use serde::{Deserialize, Serialize};

/// Subscription frame for the public market channel.
#[derive(Debug, Serialize)]
pub struct MarketSubscribe {
    pub assets_ids: Vec<String>,
    #[serde(rename = "type")]
    pub msg_type: String,
}

impl MarketSubscribe {
    #[must_use]
    pub fn new(asset_ids: Vec<String>) -> Self {
        Self {
            assets_ids: asset_ids,
            msg_type: "market".into(),
        }
    }
}

/// Subscription frame for the authenticated user channel.
#[derive(Debug, Serialize)]
pub struct UserSubscribe {
    pub auth: UserAuth,
    pub markets: Vec<String>,
    #[serde(rename = "type")]
    pub msg_type: String,
}

#[derive(Debug, Serialize)]
pub struct UserAuth {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl UserSubscribe {
    #[must_use]
    pub fn new(auth: UserAuth, markets: Vec<String>) -> Self {
        Self {
            auth,
            markets,
            msg_type: "user".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsPriceLevel {
    pub price: String,
    pub size: String,
}

/// Events on the public market channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "event_type")]
pub enum MarketEvent {
    #[serde(rename = "book")]
    Book(BookDelta),

    #[serde(rename = "price_change")]
    PriceChange(PriceChangeSnapshot),

    #[serde(rename = "tick_size_change")]
    TickSizeChange(serde_json::Value),

    #[serde(other)]
    Unknown,
}

/// A book delta: carries only bids or only asks, never both
/// (`spec.md` §4.8 step 2).
#[derive(Debug, Deserialize)]
pub struct BookDelta {
    pub asset_id: String,
    #[serde(default)]
    pub bids: Option<Vec<WsPriceLevel>>,
    #[serde(default)]
    pub asks: Option<Vec<WsPriceLevel>>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PriceChangeSnapshot {
    pub changes: Vec<PriceChangeEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PriceChangeEntry {
    pub asset_id: String,
    pub best_bid: String,
    pub best_ask: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
}

/// Events on the authenticated user channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "event_type")]
pub enum UserEvent {
    #[serde(rename = "trade")]
    Trade(TradeEvent),

    #[serde(rename = "order")]
    Order(OrderStatusEvent),

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct TradeEvent {
    pub id: String,
    pub asset_id: String,
    pub market: String,
    pub side: String,
    pub price: String,
    pub size: String,
    pub status: String,
    pub taker_order_id: String,
    #[serde(default)]
    pub maker_orders: Vec<MakerOrderRef>,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct MakerOrderRef {
    pub order_id: String,
    pub matched_amount: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderStatusEvent {
    pub id: String,
    pub status: String,
}

impl TradeEvent {
    /// Only `MATCHED` events represent a first notification of a fill
    /// (`spec.md` §4.8 step 1).
    #[must_use]
    pub fn is_matched(&self) -> bool {
        self.status.eq_ignore_ascii_case("matched")
    }

    /// Dedup key: prefer the trade id, fall back to `taker_order_id +
    /// timestamp` (`spec.md` §4.8 step 1).
    #[must_use]
    pub fn dedup_key(&self) -> String {
        if !self.id.is_empty() {
            self.id.clone()
        } else {
            format!("{}-{}", self.taker_order_id, self.timestamp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_delta_parses_bids_only_payload() {
        let raw = r#"{"event_type":"book","asset_id":"tok1","bids":[{"price":"0.5","size":"10"}],"timestamp":"123"}"#;
        let event: MarketEvent = serde_json::from_str(raw).unwrap();
        match event {
            MarketEvent::Book(delta) => {
                assert_eq!(delta.asset_id, "tok1");
                assert!(delta.bids.is_some());
                assert!(delta.asks.is_none());
            }
            _ => panic!("expected book delta"),
        }
    }

    #[test]
    fn unknown_event_type_does_not_error() {
        let raw = r#"{"event_type":"tick_size_change","x":1}"#;
        let event: MarketEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, MarketEvent::TickSizeChange(_)));
    }

    #[test]
    fn trade_event_matched_detection() {
        let raw = r#"{"event_type":"trade","id":"t1","asset_id":"tok1","market":"c1","side":"BUY","price":"0.5","size":"10","status":"MATCHED","taker_order_id":"o1","timestamp":"123"}"#;
        let event: UserEvent = serde_json::from_str(raw).unwrap();
        match event {
            UserEvent::Trade(t) => {
                assert!(t.is_matched());
                assert_eq!(t.dedup_key(), "t1");
            }
            _ => panic!("expected trade event"),
        }
    }

    #[test]
    fn dedup_key_falls_back_without_trade_id() {
        let t = TradeEvent {
            id: String::new(),
            asset_id: "tok1".into(),
            market: "c1".into(),
            side: "BUY".into(),
            price: "0.5".into(),
            size: "10".into(),
            status: "MATCHED".into(),
            taker_order_id: "o1".into(),
            maker_orders: vec![],
            timestamp: "123".into(),
        };
        assert_eq!(t.dedup_key(), "o1-123");
    }
}
