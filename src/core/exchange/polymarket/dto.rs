//! Wire-format structs for the Polymarket CLOB REST API.
//!
//! Every numeric field the exchange serializes as a string is parsed here,
//! at the boundary, so the rest of the crate only ever sees
//! [`rust_decimal::Decimal`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct MarketsResponse {
    pub data: Option<Vec<MarketDto>>,
    #[allow(dead_code)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarketDto {
    pub condition_id: String,
    pub question: Option<String>,
    pub tokens: Vec<TokenDto>,
    pub active: bool,
    pub closed: bool,
    #[serde(default)]
    pub end_date_iso: Option<String>,
    #[serde(default)]
    pub neg_risk: bool,
    #[serde(default)]
    pub minimum_tick_size: Option<String>,
    #[serde(default, alias = "volume24hr")]
    pub volume_24hr: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct TokenDto {
    pub token_id: String,
    pub outcome: String,
}

#[derive(Debug, Deserialize)]
pub struct RewardConfigDto {
    pub condition_id: String,
    #[serde(alias = "max_spread")]
    pub max_spread_cents: String,
    pub min_size: String,
    /// `spec.md` §4.2 step 1: the effective rate is `total_daily_rate OR
    /// native_daily_rate` — the exchange reports whichever applies to the
    /// reward program backing this market, never both.
    #[serde(default)]
    pub total_daily_rate: Option<String>,
    #[serde(default)]
    pub native_daily_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderBookDto {
    pub asset_id: String,
    pub bids: Vec<PriceLevelDto>,
    pub asks: Vec<PriceLevelDto>,
    #[serde(default)]
    pub tick_size: Option<String>,
    #[serde(default)]
    pub neg_risk: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceLevelDto {
    pub price: String,
    pub size: String,
}

#[derive(Debug, Deserialize)]
pub struct MidpointDto {
    pub mid: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenOrderDto {
    pub id: String,
    pub asset_id: String,
    pub market: String,
    pub side: String,
    pub price: String,
    pub original_size: String,
    pub size_matched: String,
}

#[derive(Debug, Deserialize)]
pub struct TradeDto {
    pub id: String,
    pub asset_id: String,
    pub side: String,
    pub price: String,
    pub size: String,
    pub status: String,
    pub taker_order_id: Option<String>,
    #[serde(default)]
    pub maker_orders: Vec<MakerOrderDto>,
    pub match_time: String,
}

#[derive(Debug, Deserialize)]
pub struct MakerOrderDto {
    pub order_id: String,
}

#[derive(Debug, Serialize)]
pub struct OrderSubmissionDto {
    pub token_id: String,
    pub price: String,
    pub size: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub post_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct OrderSubmissionResponseDto {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "orderID")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceDto {
    pub balance: String,
}

#[derive(Debug, Deserialize)]
pub struct PositionDto {
    pub asset: String,
    pub size: String,
}

#[derive(Debug, Deserialize)]
pub struct RedeemResponseDto {
    pub transaction_hash: String,
}
