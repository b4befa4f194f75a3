//! Handler for the `status` command.

use crate::app::Config;
use crate::core::store::StateStore;
use crate::error::Result;

/// Print the persisted engine snapshot, or report that none exists yet.
pub async fn execute(config_path: &std::path::Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = StateStore::new(config.state_path.clone());

    match store.load().await? {
        None => {
            println!("no state snapshot found at {}", config.state_path.display());
        }
        Some(state) => {
            println!("running:              {}", state.running);
            println!("kill switch triggered: {}", state.kill_switch_triggered);
            println!("day paused:            {}", state.day_paused);
            println!("collateral balance:    {}", state.collateral_balance);
            println!("peak balance:          {}", state.peak_balance);
            println!("daily pnl:             {}", state.daily_pnl);
            println!("total pnl:             {}", state.total_pnl);
            println!("active markets:        {}", state.active_market_ids.len());
            println!("paused markets:        {}", state.paused_market_ids.len());
            println!("open positions:        {}", state.positions.iter().filter(|p| !p.is_flat()).count());
            println!("tracked orders:        {}", state.tracked_orders.len());
            if let Some(at) = state.last_refresh_at {
                println!("last refresh:          {at}");
            }
            if let Some(at) = state.last_scan_at {
                println!("last scan:             {at}");
            }
        }
    }
    Ok(())
}
