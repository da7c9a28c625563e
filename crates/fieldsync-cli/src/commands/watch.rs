use std::time::Duration;

use crate::commands::common::Engine;
use crate::error::CliError;

/// Keep the scheduler alive, probing the remote store so queued jobs run
/// as soon as it becomes reachable.
pub async fn run_watch(engine: &Engine, probe_interval: u64) -> Result<(), CliError> {
    if engine.manager.initialize() {
        tracing::info!("Background sync started");
    }
    engine.manager.schedule_immediate_sync();

    let mut ticker = tokio::time::interval(Duration::from_secs(probe_interval.max(1)));
    let mut was_online = engine.connectivity.is_online();
    println!("Watching for pending records (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let online = engine.refresh_connectivity().await;
                if online != was_online {
                    println!("{}", if online { "Back online" } else { "Offline, queueing locally" });
                    was_online = online;
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    engine.manager.cleanup();
    println!("Stopped");
    Ok(())
}
