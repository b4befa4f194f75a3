//! REST implementation of [`ExchangeGateway`] against the Polymarket CLOB.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client as HttpClient;
use tracing::{debug, info, warn};

use super::dto::{
    BalanceDto, MarketDto, MidpointDto, OpenOrderDto, OrderBookDto, OrderSubmissionDto,
    OrderSubmissionResponseDto, PositionDto, RedeemResponseDto, RewardConfigDto, TradeDto,
};
use crate::core::domain::{
    order::OrderType, ConditionId, Market, OrderId, OrderSpec, Price, PriceLevel, RewardConfig, Shares, Side,
    Token, TokenId, TrackedOrder,
};
use crate::core::exchange::{
    ExchangeGateway, GatewayError, MarketMeta, OrderAck, RawOrderBook, RemotePosition, RemoteTrade, Signer,
};

/// REST client for the Polymarket CLOB API.
pub struct PolymarketGateway {
    http: HttpClient,
    base_url: String,
    signer: Arc<dyn Signer>,
}

impl PolymarketGateway {
    #[must_use]
    pub fn new(base_url: impl Into<String>, signer: Arc<dyn Signer>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into(),
            signer,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_err(e: reqwest::Error) -> GatewayError {
        GatewayError::Transport(e.to_string())
    }

    fn parse_decimal(raw: &str, field: &'static str) -> Result<Price, GatewayError> {
        Price::from_str(raw).map_err(|_| GatewayError::Malformed(format!("bad decimal in `{field}`: {raw}")))
    }

    /// `spec.md` §4.2 step 1: `daily_rate := total_daily_rate OR native_daily_rate`.
    fn effective_daily_rate(dto: &RewardConfigDto) -> Option<&str> {
        dto.total_daily_rate.as_deref().or(dto.native_daily_rate.as_deref())
    }

    fn level(dto: &super::dto::PriceLevelDto) -> Result<PriceLevel, GatewayError> {
        let price = Self::parse_decimal(&dto.price, "price")?;
        let size = Self::parse_decimal(&dto.size, "size")?;
        Ok(PriceLevel::new(price, size))
    }
}

#[async_trait]
impl ExchangeGateway for PolymarketGateway {
    async fn init(&self) -> Result<(), GatewayError> {
        info!(base_url = %self.base_url, "initializing Polymarket gateway");
        Ok(())
    }

    async fn get_collateral_balance(&self) -> Result<Price, GatewayError> {
        let resp: BalanceDto = self
            .http
            .get(self.url("/balance/collateral"))
            .send()
            .await
            .map_err(Self::transport_err)?
            .json()
            .await
            .map_err(Self::transport_err)?;
        Self::parse_decimal(&resp.balance, "balance")
    }

    async fn get_conditional_balance(&self, token: &TokenId) -> Result<Shares, GatewayError> {
        let resp: BalanceDto = self
            .http
            .get(self.url(&format!("/balance/conditional/{}", token.as_str())))
            .send()
            .await
            .map_err(Self::transport_err)?
            .json()
            .await
            .map_err(Self::transport_err)?;
        Self::parse_decimal(&resp.balance, "balance")
    }

    async fn get_midpoint(&self, token: &TokenId) -> Result<Price, GatewayError> {
        let resp: MidpointDto = self
            .http
            .get(self.url(&format!("/midpoint?token_id={}", token.as_str())))
            .send()
            .await
            .map_err(Self::transport_err)?
            .json()
            .await
            .map_err(Self::transport_err)?;
        Self::parse_decimal(&resp.mid, "mid")
    }

    async fn get_midpoints(&self, tokens: &[TokenId]) -> Result<Vec<(TokenId, Price)>, GatewayError> {
        let mut out = Vec::with_capacity(tokens.len());
        for token in tokens {
            match self.get_midpoint(token).await {
                Ok(mid) => out.push((token.clone(), mid)),
                Err(e) => warn!(token = %token, error = %e, "midpoint fetch failed, skipping"),
            }
        }
        Ok(out)
    }

    async fn get_order_book(&self, token: &TokenId) -> Result<RawOrderBook, GatewayError> {
        let dto: OrderBookDto = self
            .http
            .get(self.url(&format!("/book?token_id={}", token.as_str())))
            .send()
            .await
            .map_err(Self::transport_err)?
            .json()
            .await
            .map_err(Self::transport_err)?;

        let bids = dto.bids.iter().map(Self::level).collect::<Result<Vec<_>, _>>()?;
        let asks = dto.asks.iter().map(Self::level).collect::<Result<Vec<_>, _>>()?;
        let tick_size = dto
            .tick_size
            .as_deref()
            .map(|t| Self::parse_decimal(t, "tick_size"))
            .transpose()?
            .unwrap_or(Price::new(1, 3));

        Ok(RawOrderBook {
            token_id: TokenId::new(dto.asset_id),
            bids,
            asks,
            tick_size,
            neg_risk: dto.neg_risk,
            observed_at: Utc::now(),
        })
    }

    async fn get_order_books(&self, tokens: &[TokenId]) -> Result<Vec<RawOrderBook>, GatewayError> {
        let mut out = Vec::with_capacity(tokens.len());
        for token in tokens {
            out.push(self.get_order_book(token).await?);
        }
        Ok(out)
    }

    async fn get_open_orders(&self) -> Result<Vec<TrackedOrder>, GatewayError> {
        let dtos: Vec<OpenOrderDto> = self
            .http
            .get(self.url("/orders"))
            .send()
            .await
            .map_err(Self::transport_err)?
            .json()
            .await
            .map_err(Self::transport_err)?;

        let mut orders = Vec::with_capacity(dtos.len());
        for dto in dtos {
            let side = parse_side(&dto.side)?;
            let price = Self::parse_decimal(&dto.price, "price")?;
            let original = Self::parse_decimal(&dto.original_size, "original_size")?;
            let matched = Self::parse_decimal(&dto.size_matched, "size_matched")?;
            let mut order = TrackedOrder::new(
                OrderId::new(dto.id),
                TokenId::new(dto.asset_id),
                ConditionId::new(dto.market),
                side,
                price,
                original,
                Utc::now(),
                0,
                true,
            );
            if !matched.is_zero() {
                order
                    .record_fill(matched)
                    .map_err(|e| GatewayError::Malformed(e.to_string()))?;
            }
            orders.push(order);
        }
        Ok(orders)
    }

    async fn get_trades(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteTrade>, GatewayError> {
        let mut url = self.url("/data/trades");
        if let Some(since) = since {
            url = format!("{url}?after={}", since.timestamp());
        }
        let dtos: Vec<TradeDto> = self
            .http
            .get(url)
            .send()
            .await
            .map_err(Self::transport_err)?
            .json()
            .await
            .map_err(Self::transport_err)?;

        let mut trades = Vec::with_capacity(dtos.len());
        for dto in dtos {
            let side = parse_side(&dto.side)?;
            let price = Self::parse_decimal(&dto.price, "price")?;
            let size = Self::parse_decimal(&dto.size, "size")?;
            let timestamp = dto
                .match_time
                .parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or_else(Utc::now);
            trades.push(RemoteTrade {
                trade_id: dto.id,
                taker_order_id: dto.taker_order_id,
                maker_order_ids: dto.maker_orders.into_iter().map(|m| m.order_id).collect(),
                token_id: TokenId::new(dto.asset_id),
                side,
                price,
                size,
                timestamp,
            });
        }
        Ok(trades)
    }

    async fn get_reward_configs(&self) -> Result<Vec<RewardConfig>, GatewayError> {
        let dtos: Vec<RewardConfigDto> = self
            .http
            .get(self.url("/rewards/markets"))
            .send()
            .await
            .map_err(Self::transport_err)?
            .json()
            .await
            .map_err(Self::transport_err)?;

        let mut configs = Vec::with_capacity(dtos.len());
        for dto in dtos {
            let max_spread = Self::parse_decimal(&dto.max_spread_cents, "max_spread")? / Price::from(100);
            let min_size = Self::parse_decimal(&dto.min_size, "min_size")?;
            let raw_daily_rate = Self::effective_daily_rate(&dto)
                .ok_or_else(|| GatewayError::Malformed(format!("no daily rate for {}", dto.condition_id)))?;
            let daily_rate = Self::parse_decimal(raw_daily_rate, "daily_rate")?;
            configs.push(RewardConfig::new(ConditionId::new(dto.condition_id), max_spread, min_size, daily_rate));
        }
        Ok(configs)
    }

    async fn get_market(&self, condition: &ConditionId) -> Result<MarketMeta, GatewayError> {
        let url = self.url(&format!("/markets/{}", condition.as_str()));
        debug!(url = %url, "fetching market");
        let dto: MarketDto = self
            .http
            .get(url)
            .send()
            .await
            .map_err(Self::transport_err)?
            .json()
            .await
            .map_err(Self::transport_err)?;
        market_meta_from_dto(dto)
    }

    async fn create_and_post_order(&self, spec: &OrderSpec) -> Result<OrderAck, GatewayError> {
        let side = match spec.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let (order_type, expiration) = match spec.order_type {
            OrderType::Gtc => ("GTC", None),
            OrderType::Gtd { expires_at_unix } => ("GTD", Some(expires_at_unix)),
            OrderType::Fak => ("FAK", None),
        };
        let body = OrderSubmissionDto {
            token_id: spec.token_id.as_str().to_string(),
            price: spec.price.to_string(),
            size: spec.size.to_string(),
            side: side.to_string(),
            order_type: order_type.to_string(),
            post_only: spec.post_only,
            expiration,
        };
        let payload = serde_json::to_vec(&body).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        let _signature = self.signer.sign_order(&payload).await?;

        let resp: OrderSubmissionResponseDto = self
            .http
            .post(self.url("/order"))
            .json(&body)
            .send()
            .await
            .map_err(Self::transport_err)?
            .json()
            .await
            .map_err(Self::transport_err)?;

        if !resp.success {
            return Err(classify_rejection(resp.error_msg.as_deref().unwrap_or("")));
        }
        let order_id = resp
            .order_id
            .ok_or_else(|| GatewayError::Malformed("success without order_id".into()))?;
        Ok(OrderAck {
            order_id: OrderId::new(order_id),
            success: true,
        })
    }

    async fn cancel_orders(&self, ids: &[OrderId]) -> Result<(), GatewayError> {
        let ids: Vec<String> = ids.iter().map(|i| i.as_str().to_string()).collect();
        self.http
            .delete(self.url("/orders"))
            .json(&serde_json::json!({ "orderIDs": ids }))
            .send()
            .await
            .map_err(Self::transport_err)?;
        Ok(())
    }

    async fn cancel_market_orders(&self, condition: &ConditionId) -> Result<(), GatewayError> {
        self.http
            .delete(self.url("/orders"))
            .json(&serde_json::json!({ "market": condition.as_str() }))
            .send()
            .await
            .map_err(Self::transport_err)?;
        Ok(())
    }

    async fn cancel_all(&self) -> Result<(), GatewayError> {
        self.http
            .delete(self.url("/orders/all"))
            .send()
            .await
            .map_err(Self::transport_err)?;
        Ok(())
    }

    async fn redeem(&self, condition: &ConditionId, index_sets: &[u64]) -> Result<String, GatewayError> {
        let resp: RedeemResponseDto = self
            .http
            .post(self.url("/redeem"))
            .json(&serde_json::json!({
                "conditionId": condition.as_str(),
                "indexSets": index_sets,
            }))
            .send()
            .await
            .map_err(Self::transport_err)?
            .json()
            .await
            .map_err(Self::transport_err)?;
        Ok(resp.transaction_hash)
    }

    async fn get_user_positions_remote(&self) -> Result<Vec<RemotePosition>, GatewayError> {
        let dtos: Vec<PositionDto> = self
            .http
            .get(self.url("/positions"))
            .send()
            .await
            .map_err(Self::transport_err)?
            .json()
            .await
            .map_err(Self::transport_err)?;

        let mut positions = Vec::with_capacity(dtos.len());
        for dto in dtos {
            let shares = Self::parse_decimal(&dto.size, "size")?;
            positions.push(RemotePosition {
                token_id: TokenId::new(dto.asset),
                shares,
            });
        }
        Ok(positions)
    }
}

fn parse_side(raw: &str) -> Result<Side, GatewayError> {
    match raw.to_ascii_uppercase().as_str() {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(GatewayError::Malformed(format!("unknown side `{other}`"))),
    }
}

fn classify_rejection(message: &str) -> GatewayError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("post only") || lower.contains("post_only") || lower.contains("would cross") {
        GatewayError::PostOnlyRejected
    } else if lower.contains("balance") || lower.contains("allowance") {
        GatewayError::InsufficientBalance
    } else if lower.contains("rate limit") {
        GatewayError::RateLimited
    } else if lower.contains("auth") || lower.contains("unauthorized") {
        GatewayError::Auth(message.to_string())
    } else {
        GatewayError::Malformed(message.to_string())
    }
}

fn market_meta_from_dto(dto: MarketDto) -> Result<MarketMeta, GatewayError> {
    let mut tokens = dto.tokens.into_iter();
    let first = tokens
        .next()
        .ok_or_else(|| GatewayError::Malformed("market has no tokens".into()))?;
    let second = tokens
        .next()
        .ok_or_else(|| GatewayError::Malformed("market has fewer than two tokens".into()))?;

    let yes_id = TokenId::new(first.token_id);
    let no_id = TokenId::new(second.token_id);
    let yes = Token::new(yes_id.clone(), first.outcome, no_id.clone());
    let no = Token::new(no_id, second.outcome, yes_id);

    let tick_size = dto
        .minimum_tick_size
        .as_deref()
        .map(|t| PolymarketGateway::parse_decimal(t, "minimum_tick_size"))
        .transpose()?
        .unwrap_or(Price::new(1, 3));

    let end_date = dto.end_date_iso.as_deref().and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    });

    let daily_volume = dto
        .volume_24hr
        .and_then(rust_decimal::Decimal::from_f64_retain);

    Ok(MarketMeta {
        condition_id: ConditionId::new(dto.condition_id),
        question: dto.question.unwrap_or_default(),
        yes,
        no,
        active: dto.active && !dto.closed,
        end_date,
        neg_risk: dto.neg_risk,
        tick_size,
        daily_volume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_rejection_detects_post_only() {
        assert_eq!(classify_rejection("order would cross the book"), GatewayError::PostOnlyRejected);
    }

    #[test]
    fn classify_rejection_detects_balance() {
        assert_eq!(classify_rejection("not enough balance/allowance"), GatewayError::InsufficientBalance);
    }

    #[test]
    fn classify_rejection_falls_back_to_malformed() {
        assert!(matches!(classify_rejection("totally unexpected"), GatewayError::Malformed(_)));
    }

    #[test]
    fn parse_side_rejects_unknown() {
        assert!(parse_side("HOLD").is_err());
        assert_eq!(parse_side("buy").unwrap(), Side::Buy);
    }

    fn reward_dto(total: Option<&str>, native: Option<&str>) -> RewardConfigDto {
        RewardConfigDto {
            condition_id: "c1".into(),
            max_spread_cents: "5".into(),
            min_size: "100".into(),
            total_daily_rate: total.map(str::to_string),
            native_daily_rate: native.map(str::to_string),
        }
    }

    #[test]
    fn effective_daily_rate_prefers_total_over_native() {
        let dto = reward_dto(Some("30"), Some("10"));
        assert_eq!(PolymarketGateway::effective_daily_rate(&dto), Some("30"));
    }

    #[test]
    fn effective_daily_rate_falls_back_to_native() {
        let dto = reward_dto(None, Some("10"));
        assert_eq!(PolymarketGateway::effective_daily_rate(&dto), Some("10"));
    }

    #[test]
    fn effective_daily_rate_none_when_both_missing() {
        let dto = reward_dto(None, None);
        assert_eq!(PolymarketGateway::effective_daily_rate(&dto), None);
    }
}
