use std::collections::BTreeMap;

use fieldsync_core::sync::SyncStatusSummary;
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, Engine};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub state: String,
    pub online: bool,
    pub owner: Option<String>,
    pub kinds: BTreeMap<String, KindStatusItem>,
    pub total_cached: Option<usize>,
    pub has_offline_data: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct KindStatusItem {
    pub unsynced: usize,
    pub failed: usize,
    pub last_sync_attempt: Option<i64>,
    pub cached: Option<usize>,
}

impl KindStatusItem {
    fn from_summary(summary: &SyncStatusSummary) -> Self {
        Self {
            unsynced: summary.total_unsynced,
            failed: summary.failed_count,
            last_sync_attempt: summary.last_sync_attempt,
            cached: None,
        }
    }
}

pub async fn collect_status(engine: &Engine) -> Result<StatusItem, CliError> {
    let mut kinds = BTreeMap::new();
    kinds.insert(
        "report".to_string(),
        KindStatusItem::from_summary(&engine.reports.status().await?),
    );
    kinds.insert(
        "task".to_string(),
        KindStatusItem::from_summary(&engine.tasks.status().await?),
    );

    let mut item = StatusItem {
        state: engine.manager.sync_state().await?.label().to_string(),
        online: engine.connectivity.is_online(),
        owner: engine.owner.as_ref().map(ToString::to_string),
        kinds,
        total_cached: None,
        has_offline_data: None,
    };

    // Cache counts are per owner and only available once someone is signed in
    if engine.owner.is_some() {
        let info = engine.manager.offline_data_info().await?;
        for (kind, counts) in &info.per_kind {
            if let Some(entry) = item.kinds.get_mut(&kind.to_string()) {
                entry.cached = Some(counts.cached);
            }
        }
        item.total_cached = Some(info.total_cached);
        item.has_offline_data = Some(info.has_offline_data);
    }

    Ok(item)
}

pub fn format_status_lines(status: &StatusItem) -> Vec<String> {
    let mut lines = vec![format!(
        "State: {}{}",
        status.state,
        status
            .owner
            .as_ref()
            .map_or_else(String::new, |owner| format!(" (owner {owner})"))
    )];

    for (kind, counts) in &status.kinds {
        let mut line = format!(
            "{kind:<7} unsynced {:<4} failed {:<4}",
            counts.unsynced, counts.failed
        );
        if let Some(cached) = counts.cached {
            line.push_str(&format!(" cached {cached:<4}"));
        }
        if let Some(attempt) = counts.last_sync_attempt {
            line.push_str(&format!(" last attempt {}", format_sync_timestamp(attempt)));
        }
        lines.push(line.trim_end().to_string());
    }

    if status.has_offline_data == Some(true) {
        lines.push("Offline data available on this device.".to_string());
    }
    lines
}

pub async fn run_status(engine: &Engine, as_json: bool) -> Result<(), CliError> {
    let status = collect_status(engine).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        for line in format_status_lines(&status) {
            println!("{line}");
        }
    }
    Ok(())
}
