//! Application configuration loading and validation (`spec.md` §6).
//!
//! Loaded from a TOML file with environment-variable overrides for the
//! signing key, which is never written to the config file.

use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::domain::Price;
use crate::core::engine::EngineConfig;
use crate::core::quote::QuoteConfig;
use crate::core::scanner::ScanConfig;
use crate::error::{ConfigError, Result};

/// Exchange environment (testnet vs mainnet).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Testnet,
    Mainnet,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Testnet => write!(f, "testnet"),
            Self::Mainnet => write!(f, "mainnet"),
        }
    }
}

/// Network endpoints for the exchange gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

fn default_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/".into()
}

fn default_api_url() -> String {
    "https://clob.polymarket.com".into()
}

/// Amoy testnet chain id, kept as the safe default.
const fn default_chain_id() -> u64 {
    80002
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            ws_url: default_ws_url(),
            api_url: default_api_url(),
            chain_id: default_chain_id(),
        }
    }
}

/// Wallet configuration for signing orders. The private key is loaded from
/// `WALLET_PRIVATE_KEY` at runtime, never from the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    #[serde(skip)]
    pub private_key: Option<String>,
    /// Polymarket proxy/funder address, when trading through a Safe.
    #[serde(default)]
    pub funder_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// The full recognized configuration surface (`spec.md` §6 table).
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Fraction of balance treated as deployable per market, `[0.5, 1.0]`.
    #[serde(default = "default_deploy_ratio")]
    pub deploy_ratio: Decimal,
    /// Fraction of balance used as per-token order USD budget, `[0.1, 0.5]`.
    #[serde(default = "default_order_size_ratio")]
    pub order_size_ratio: Decimal,
    /// Fraction held as reserve, `[0, 0.5]`.
    #[serde(default = "default_reserve_ratio")]
    pub reserve_ratio: Decimal,
    /// Placement distance from mid as a fraction of `max_spread`, `[0.1, 0.9]`.
    #[serde(default = "default_spread_ratio")]
    pub spread_ratio: Decimal,
    /// Cancel-trigger distance from mid as a fraction of `max_spread`,
    /// `[0.05, 0.8]`. Must be strictly less than `spread_ratio`.
    #[serde(default = "default_danger_spread_ratio")]
    pub danger_spread_ratio: Decimal,
    /// Post-cooldown wait, milliseconds, `[30_000, 600_000]`.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: i64,
    /// Main tick cadence, milliseconds, minimum `5_000`.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// Active-market cap, `[1, 50]`.
    #[serde(default = "default_max_concurrent_markets")]
    pub max_concurrent_markets: usize,
    #[serde(default = "default_min_reward_rate")]
    pub min_reward_rate: Decimal,
    #[serde(default)]
    pub min_bid_depth_usd: Option<Decimal>,
    #[serde(default)]
    pub min_max_spread: Option<Decimal>,
    #[serde(default)]
    pub min_daily_volume: Option<Decimal>,
    /// Staged-exit boundaries, in minutes, for the non-default multi-stage
    /// accidental-fill fallback.
    #[serde(default = "default_accidental_fill_timeouts")]
    pub accidental_fill_timeouts: (u32, u32, u32, u32),
    /// Price floor as a fraction of entry for gradual exits, `[0.1, 0.95]`.
    #[serde(default = "default_min_sell_price_ratio")]
    pub min_sell_price_ratio: Decimal,
    #[serde(default = "default_max_drawdown_percent")]
    pub max_drawdown_percent: f64,
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: Decimal,
    #[serde(default)]
    pub single_sided: bool,
    #[serde(default)]
    pub liquidate_on_stop: bool,
    #[serde(default = "default_true")]
    pub liquidate_on_kill: bool,
    /// How long a market must quote without a cooldown before
    /// `consecutive_cooldowns` resets to 0, milliseconds.
    #[serde(default = "default_cooldown_stability_reset_ms")]
    pub cooldown_stability_reset_ms: i64,
}

const fn default_true() -> bool {
    true
}

fn default_deploy_ratio() -> Decimal {
    dec!(0.95)
}

fn default_order_size_ratio() -> Decimal {
    dec!(0.25)
}

fn default_reserve_ratio() -> Decimal {
    dec!(0.05)
}

fn default_spread_ratio() -> Decimal {
    dec!(0.85)
}

fn default_danger_spread_ratio() -> Decimal {
    dec!(0.55)
}

const fn default_cooldown_ms() -> i64 {
    60_000
}

const fn default_refresh_interval_ms() -> u64 {
    5_000
}

const fn default_max_concurrent_markets() -> usize {
    10
}

fn default_min_reward_rate() -> Decimal {
    dec!(10)
}

const fn default_accidental_fill_timeouts() -> (u32, u32, u32, u32) {
    (5, 15, 30, 60)
}

fn default_min_sell_price_ratio() -> Decimal {
    dec!(0.7)
}

fn default_max_drawdown_percent() -> f64 {
    25.0
}

fn default_max_daily_loss() -> Decimal {
    dec!(100)
}

const fn default_cooldown_stability_reset_ms() -> i64 {
    300_000
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            deploy_ratio: default_deploy_ratio(),
            order_size_ratio: default_order_size_ratio(),
            reserve_ratio: default_reserve_ratio(),
            spread_ratio: default_spread_ratio(),
            danger_spread_ratio: default_danger_spread_ratio(),
            cooldown_ms: default_cooldown_ms(),
            refresh_interval_ms: default_refresh_interval_ms(),
            max_concurrent_markets: default_max_concurrent_markets(),
            min_reward_rate: default_min_reward_rate(),
            min_bid_depth_usd: None,
            min_max_spread: None,
            min_daily_volume: None,
            accidental_fill_timeouts: default_accidental_fill_timeouts(),
            min_sell_price_ratio: default_min_sell_price_ratio(),
            max_drawdown_percent: default_max_drawdown_percent(),
            max_daily_loss: default_max_daily_loss(),
            single_sided: false,
            liquidate_on_stop: false,
            liquidate_on_kill: true,
            cooldown_stability_reset_ms: default_cooldown_stability_reset_ms(),
        }
    }
}

impl TradingConfig {
    /// Build the [`EngineConfig`] the engine loop actually consumes.
    #[must_use]
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            deploy_ratio: self.deploy_ratio,
            order_size_ratio: self.order_size_ratio,
            reserve_ratio: self.reserve_ratio,
            cooldown_ms: self.cooldown_ms,
            danger_spread_ratio: self.danger_spread_ratio,
            max_concurrent_markets: self.max_concurrent_markets,
            max_drawdown_percent: self.max_drawdown_percent,
            max_daily_loss: self.max_daily_loss,
            quote: QuoteConfig {
                spread_ratio: self.spread_ratio,
                single_sided: self.single_sided,
                min_ticks_from_mid: 1,
            },
            scan: ScanConfig {
                min_reward_rate: self.min_reward_rate,
                // Overridden every scan from the live balance-derived Sizing;
                // the value here is never read.
                max_capital_per_market: Price::from(1),
                min_max_spread: self.min_max_spread,
                min_bid_depth_usd: self.min_bid_depth_usd,
                min_daily_volume: self.min_daily_volume,
            },
            liquidate_on_stop: self.liquidate_on_stop,
            liquidate_on_kill: self.liquidate_on_kill,
            cooldown_stability_reset_ms: self.cooldown_stability_reset_ms,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    /// Where [`crate::core::store::StateStore`] persists `EngineState`.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("scoreguard_state.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            wallet: WalletConfig::default(),
            logging: LoggingConfig::default(),
            trading: TradingConfig::default(),
            state_path: default_state_path(),
        }
    }
}

impl Config {
    /// Load from `path`, overlay `WALLET_PRIVATE_KEY`, then validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is malformed TOML, or
    /// [`ConfigError::Invalid`] if a recognized field is out of range.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path_ref.display().to_string(),
            source,
        })?;

        config.wallet.private_key = std::env::var("WALLET_PRIVATE_KEY").ok();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let t = &self.trading;
        check_range("deploy_ratio", t.deploy_ratio, dec!(0.5), dec!(1.0))?;
        check_range("order_size_ratio", t.order_size_ratio, dec!(0.1), dec!(0.5))?;
        check_range("reserve_ratio", t.reserve_ratio, Decimal::ZERO, dec!(0.5))?;
        check_range("spread_ratio", t.spread_ratio, dec!(0.1), dec!(0.9))?;
        check_range("danger_spread_ratio", t.danger_spread_ratio, dec!(0.05), dec!(0.8))?;
        check_range("min_sell_price_ratio", t.min_sell_price_ratio, dec!(0.1), dec!(0.95))?;

        if t.danger_spread_ratio >= t.spread_ratio {
            return Err(ConfigError::Invalid {
                field: "danger_spread_ratio",
                reason: "must be strictly less than spread_ratio".into(),
            }
            .into());
        }
        if !(30_000..=600_000).contains(&t.cooldown_ms) {
            return Err(ConfigError::Invalid {
                field: "cooldown_ms",
                reason: "must be within [30_000, 600_000]".into(),
            }
            .into());
        }
        if t.refresh_interval_ms < 5_000 {
            return Err(ConfigError::Invalid {
                field: "refresh_interval_ms",
                reason: "must be at least 5_000".into(),
            }
            .into());
        }
        if !(1..=50).contains(&t.max_concurrent_markets) {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_markets",
                reason: "must be within [1, 50]".into(),
            }
            .into());
        }
        if self.state_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "state_path",
                reason: "must not be empty".into(),
            }
            .into());
        }
        Ok(())
    }

    /// Initialize the global tracing subscriber from `logging`.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.logging.level));
        match self.logging.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

fn check_range(field: &'static str, value: Decimal, low: Decimal, high: Decimal) -> Result<()> {
    if value < low || value > high {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("must be within [{low}, {high}], got {value}"),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn danger_spread_ratio_must_be_below_spread_ratio() {
        let mut config = Config::default();
        config.trading.danger_spread_ratio = config.trading.spread_ratio;
        assert!(config.validate().is_err());
    }

    #[test]
    fn cooldown_ms_out_of_range_is_rejected() {
        let mut config = Config::default();
        config.trading.cooldown_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn refresh_interval_below_floor_is_rejected() {
        let mut config = Config::default();
        config.trading.refresh_interval_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let result = Config::load("/nonexistent/scoreguard.toml");
        assert!(result.is_err());
    }

    #[test]
    fn to_engine_config_carries_ratios_through() {
        let config = Config::default();
        let engine_config = config.trading.to_engine_config();
        assert_eq!(engine_config.deploy_ratio, config.trading.deploy_ratio);
        assert_eq!(engine_config.quote.spread_ratio, config.trading.spread_ratio);
    }
}
