//! Crate-wide error types.
//!
//! Three layers: a top-level [`Error`] for anything that can bubble out of
//! the engine loop, a narrower [`ConfigError`] for configuration loading, and
//! [`DomainError`] for invariant violations inside `core::domain`. Exchange
//! errors are classified separately by [`crate::core::exchange::GatewayError`]
//! so the engine never has to string-match a message.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("domain invariant violated: {0}")]
    Domain(#[from] DomainError),

    #[error("exchange gateway error: {0}")]
    Gateway(#[from] crate::core::exchange::GatewayError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("state store error: {0}")]
    Store(String),

    #[error("kill switch triggered: {0}")]
    KillSwitch(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("order {order_id} filled size {filled} exceeds original size {original}")]
    FilledExceedsOriginal {
        order_id: String,
        filled: rust_decimal::Decimal,
        original: rust_decimal::Decimal,
    },

    #[error("book snapshot invariant violated: best_bid {best_bid} midpoint {midpoint} best_ask {best_ask}")]
    BookOrientation {
        best_bid: rust_decimal::Decimal,
        midpoint: rust_decimal::Decimal,
        best_ask: rust_decimal::Decimal,
    },

    #[error("market state for {market_id} is in phase {phase} and cannot {action}")]
    InvalidPhaseTransition {
        market_id: String,
        phase: &'static str,
        action: &'static str,
    },

    #[error("cooldown market state is missing cooldown_until")]
    MissingCooldownDeadline,

    #[error("exiting market state is missing an accidental fill record")]
    MissingAccidentalFill,
}
