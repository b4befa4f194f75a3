//! Exchange abstraction: a typed façade over the external CLOB's REST and
//! signing surface (`spec.md` §4.1).
//!
//! Nothing in `core` other than this module and its `polymarket` submodule
//! knows about HTTP, WebSocket frames, or wire formats.

pub mod polymarket;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::domain::{
    BookSnapshot, ConditionId, OrderSpec, Price, RewardConfig, Shares, TokenId, TrackedOrder,
};

/// Classified exchange error (`spec.md` §4.1: "Error classification").
///
/// Classification lets the engine decide whether a rejection is an expected
/// cost of doing business (`PostOnlyRejected`, `InsufficientBalance`) or
/// something that should trip the consecutive-error circuit breaker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("post-only order would have crossed the book")]
    PostOnlyRejected,

    #[error("insufficient balance to place order")]
    InsufficientBalance,

    #[error("rate limited, retry after backoff")]
    RateLimited,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// `true` for errors the caller should treat as an ordinary cost of
    /// quoting rather than an engine error (`spec.md` §4.5: `place_order`).
    #[must_use]
    pub const fn is_routine_rejection(&self) -> bool {
        matches!(self, Self::PostOnlyRejected | Self::InsufficientBalance)
    }
}

/// Result of a successful or rejected order placement attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: crate::core::domain::OrderId,
    pub success: bool,
}

/// A raw price ladder as reported by the exchange, before domain validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOrderBook {
    pub token_id: TokenId,
    pub bids: Vec<crate::core::domain::PriceLevel>,
    pub asks: Vec<crate::core::domain::PriceLevel>,
    pub tick_size: Price,
    pub neg_risk: bool,
    pub observed_at: DateTime<Utc>,
}

/// Market metadata as reported by `get_market` (`spec.md` §4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct MarketMeta {
    pub condition_id: ConditionId,
    pub question: String,
    pub yes: crate::core::domain::Token,
    pub no: crate::core::domain::Token,
    pub active: bool,
    pub end_date: Option<DateTime<Utc>>,
    pub neg_risk: bool,
    pub tick_size: Price,
    /// Trailing 24h notional volume, when the exchange reports one
    /// (`spec.md` §6: `min_daily_volume` candidate filter).
    pub daily_volume: Option<Price>,
}

/// A confirmed trade fill for this account, as reported by `get_trades`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTrade {
    pub trade_id: String,
    pub taker_order_id: Option<String>,
    pub maker_order_ids: Vec<String>,
    pub token_id: TokenId,
    pub side: crate::core::domain::Side,
    pub price: Price,
    pub size: Shares,
    pub timestamp: DateTime<Utc>,
}

/// An authoritative non-zero conditional-token holding.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePosition {
    pub token_id: TokenId,
    pub shares: Shares,
}

/// Order duration/kill semantics carried on placement (`spec.md` §4.1).
pub use crate::core::domain::order::OrderType;

/// Typed façade over the external CLOB's REST and signing surface.
///
/// Implementations must never panic on transient network failure; they
/// classify it via [`GatewayError`] instead.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Establish a session and derive L2 credentials if needed.
    ///
    /// # Errors
    ///
    /// Fatal on auth failure — callers should treat this as unrecoverable.
    async fn init(&self) -> Result<(), GatewayError>;

    async fn get_collateral_balance(&self) -> Result<Price, GatewayError>;

    async fn get_conditional_balance(&self, token: &TokenId) -> Result<Shares, GatewayError>;

    async fn get_midpoint(&self, token: &TokenId) -> Result<Price, GatewayError>;

    /// Batched midpoint fetch. Some entries may be missing on partial
    /// failure; callers tolerate gaps.
    async fn get_midpoints(&self, tokens: &[TokenId]) -> Result<Vec<(TokenId, Price)>, GatewayError>;

    async fn get_order_book(&self, token: &TokenId) -> Result<RawOrderBook, GatewayError>;

    async fn get_order_books(&self, tokens: &[TokenId]) -> Result<Vec<RawOrderBook>, GatewayError>;

    /// Authoritative list of this account's live orders.
    async fn get_open_orders(&self) -> Result<Vec<TrackedOrder>, GatewayError>;

    /// Recent trade fills for this account. May be paginated/partial.
    async fn get_trades(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteTrade>, GatewayError>;

    async fn get_reward_configs(&self) -> Result<Vec<RewardConfig>, GatewayError>;

    async fn get_market(&self, condition: &ConditionId) -> Result<MarketMeta, GatewayError>;

    /// Sign and submit an order. Rejections are returned as a classified
    /// [`GatewayError`] rather than a panic.
    async fn create_and_post_order(
        &self,
        spec: &OrderSpec,
    ) -> Result<OrderAck, GatewayError>;

    /// Best-effort cancellation by order id. Idempotent.
    async fn cancel_orders(&self, ids: &[crate::core::domain::OrderId]) -> Result<(), GatewayError>;

    /// Best-effort cancellation of every live order on a market. Idempotent.
    async fn cancel_market_orders(&self, condition: &ConditionId) -> Result<(), GatewayError>;

    /// Best-effort cancellation of every live order on the account. Idempotent.
    async fn cancel_all(&self) -> Result<(), GatewayError>;

    /// Redeem resolved conditional tokens for collateral.
    ///
    /// # Errors
    ///
    /// Retryable — callers may call again after a transient failure.
    async fn redeem(&self, condition: &ConditionId, index_sets: &[u64]) -> Result<String, GatewayError>;

    /// Authoritative list of non-zero conditional-token balances across all
    /// tokens (used for orphan-position cleanup at startup).
    async fn get_user_positions_remote(&self) -> Result<Vec<RemotePosition>, GatewayError>;
}

/// Seam for the externally supplied signing/submission interface
/// (`spec.md` §1 Non-goals: "No wallet custody logic beyond invoking an
/// externally supplied signing/submission interface"). The core never
/// constructs key material; it only calls through this trait.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign a raw order payload, returning the exchange-specific signature
    /// bytes to attach to the submission.
    async fn sign_order(&self, payload: &[u8]) -> Result<Vec<u8>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routine_rejections_are_classified_correctly() {
        assert!(GatewayError::PostOnlyRejected.is_routine_rejection());
        assert!(GatewayError::InsufficientBalance.is_routine_rejection());
        assert!(!GatewayError::RateLimited.is_routine_rejection());
        assert!(!GatewayError::Transport("x".into()).is_routine_rejection());
        assert!(!GatewayError::Auth("x".into()).is_routine_rejection());
        assert!(!GatewayError::Malformed("x".into()).is_routine_rejection());
    }
}
