//! Command-line interface definitions.

pub mod operator;
pub mod run;
pub mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// scoreguard - cancel-before-fill liquidity-reward harvester.
#[derive(Parser, Debug)]
#[command(name = "scoreguard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "scoreguard.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine loop in the foreground until Ctrl-C.
    Start,
    /// Request a graceful shutdown of a running instance.
    Stop,
    /// Request an immediate kill-switch (cancel-all, liquidate, halt).
    EmergencyKill,
    /// Print the persisted engine snapshot.
    Status,
    /// List the currently active (quoted) markets.
    ActiveMarkets,
    /// Print reward-history estimates per market.
    RewardStatus,
    /// Add a market to the pause list, dropping its in-memory state.
    PauseMarket {
        condition_id: String,
    },
    /// Remove a market from the pause list so it can be rescanned back in.
    ResumeMarket {
        condition_id: String,
    },
    /// Run the scanner once and print the ranked candidate list.
    Rescan,
    /// Attempt on-chain redemption for a resolved market's position.
    Redeem {
        condition_id: String,
    },
    /// Liquidate every open position at the best available bid.
    SellAll,
}
