//! Handler for the `start` command.

use tokio::signal;
use tracing::{error, info};

use crate::app::{App, Config, ShutdownHandle};
use crate::error::Result;

/// Execute the `start` command: run the engine loop until Ctrl-C.
pub async fn execute(config_path: &std::path::Path) -> Result<()> {
    let config = Config::load(config_path)?;
    config.init_logging();

    let shutdown = ShutdownHandle::new();
    let signal_handle = shutdown.clone();

    let mut app_handle = tokio::spawn(App::run_with_shutdown(config, shutdown));

    tokio::select! {
        result = &mut app_handle => {
            return map_app_result(result);
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received (Ctrl-C)");
            signal_handle.trigger();
        }
    }

    map_app_result(app_handle.await)
}

fn map_app_result(result: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "engine exited with error");
            Err(e)
        }
        Err(e) => {
            error!(error = %e, "engine task panicked");
            Err(crate::error::Error::KillSwitch(format!("engine task panicked: {e}")))
        }
    }
}
