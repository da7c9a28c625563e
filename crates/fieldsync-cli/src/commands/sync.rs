use fieldsync_core::sync::FullSyncOutcome;
use fieldsync_core::RecordKind;

use crate::commands::common::Engine;
use crate::error::CliError;

pub async fn run_sync(engine: &Engine, kind: Option<RecordKind>) -> Result<(), CliError> {
    if !engine.connectivity.is_online() {
        return Err(CliError::Offline);
    }

    let Some(kind) = kind else {
        return run_full_sync(engine).await;
    };

    let report = match kind {
        RecordKind::Report => engine.reports.sync_pending(None).await?,
        RecordKind::Task => engine.tasks.sync_pending(None).await?,
    };
    println!(
        "{kind}: {} synced, {} failed",
        report.succeeded, report.failed
    );
    if report.failed > 0 {
        println!("  {}", report.error_summary());
    }
    Ok(())
}

async fn run_full_sync(engine: &Engine) -> Result<(), CliError> {
    match engine.manager.perform_full_sync().await? {
        FullSyncOutcome::Success { synced } => {
            let total: usize = synced.values().sum();
            println!("Sync completed ({total} records)");
        }
        FullSyncOutcome::PartialSuccess { synced, errors } => {
            let total: usize = synced.values().sum();
            println!("Sync partially completed ({total} records)");
            for (kind, error) in errors {
                println!("  {kind}: {error}");
            }
        }
    }
    Ok(())
}
