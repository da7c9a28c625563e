use std::path::PathBuf;

use fieldsync_core::{Record, RecordKind};
use serde_json::json;

use crate::commands::common::{
    format_record_lines, guess_mime_type, non_blank, normalize_title, parse_record_id, record_to_list_item,
    short_id, sync_label, Engine, RecordListItem,
};
use crate::error::CliError;

/// Fields for a new report as given on the command line.
#[derive(Debug, Default)]
pub struct NewReport {
    pub title: Vec<String>,
    pub description: Option<String>,
    pub draft: bool,
    pub media: Vec<PathBuf>,
}

pub async fn run_report_add(engine: &Engine, input: NewReport) -> Result<(), CliError> {
    let owner = engine.require_owner()?.clone();
    let title = normalize_title(&input.title)?;

    let mut payload = json!({ "title": title });
    if let Some(description) = non_blank(input.description) {
        payload["description"] = json!(description);
    }

    let mut record = if input.draft {
        Record::draft(RecordKind::Report, owner, payload)
    } else {
        Record::new(RecordKind::Report, owner, payload)
    };

    for path in &input.media {
        let mime_type = guess_mime_type(path)?;
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("capture");
        engine
            .reports
            .attach_media(&mut record, &bytes, file_name, &mime_type)
            .await?;
    }

    let id = engine.reports.create_record(record).await?;
    let stored = engine.reports.fetch_record(&id).await?;
    let label = stored.as_ref().map_or("pending", sync_label);
    println!("{id} ({label})");
    Ok(())
}

pub async fn run_report_list(engine: &Engine, limit: usize, as_json: bool) -> Result<(), CliError> {
    let owner = engine.require_owner()?;
    let mut reports = engine.reports.fetch_by_owner(owner).await?;
    reports.truncate(limit);

    if as_json {
        let json_items = reports
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if reports.is_empty() {
        println!("No reports yet.");
    } else {
        for line in format_record_lines(&reports) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_report_promote(engine: &Engine, id: &str) -> Result<(), CliError> {
    let id = parse_record_id(id)?;
    if engine.reports.fetch_record(&id).await?.is_none() {
        return Err(CliError::RecordNotFound(id.to_string()));
    }

    let promoted = engine.reports.promote_draft(&id).await?;
    println!("Submitted draft {} as {promoted}", short_id(&id));
    Ok(())
}
