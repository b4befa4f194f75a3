//! scoreguard binary entrypoint: parses CLI args and dispatches to a handler.

use clap::Parser;

use scoreguard::cli::{operator, run, status, Cli, Commands};
use scoreguard::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Start => run::execute(&cli.config).await,
        Commands::Stop => operator::stop(&cli.config).await,
        Commands::EmergencyKill => operator::emergency_kill(&cli.config).await,
        Commands::Status => status::execute(&cli.config).await,
        Commands::ActiveMarkets => operator::active_markets(&cli.config).await,
        Commands::RewardStatus => operator::reward_status(&cli.config).await,
        Commands::PauseMarket { condition_id } => operator::pause_market(&cli.config, condition_id).await,
        Commands::ResumeMarket { condition_id } => operator::resume_market(&cli.config, condition_id).await,
        Commands::Rescan => operator::rescan(&cli.config).await,
        Commands::Redeem { condition_id } => operator::redeem(&cli.config, condition_id).await,
        Commands::SellAll => operator::sell_all(&cli.config).await,
    }
}
