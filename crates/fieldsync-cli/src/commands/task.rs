use crate::commands::common::{
    format_record_lines, parse_record_id, record_to_list_item, Engine, RecordListItem,
};
use crate::error::CliError;

pub async fn run_task_list(engine: &Engine, limit: usize, as_json: bool) -> Result<(), CliError> {
    let owner = engine.require_owner()?;
    let mut tasks = engine.tasks.fetch_by_owner(owner).await?;
    tasks.truncate(limit);

    if as_json {
        let json_items = tasks
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if tasks.is_empty() {
        println!("No tasks assigned.");
    } else {
        for line in format_record_lines(&tasks) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_task_status(engine: &Engine, id: &str, status: &str) -> Result<(), CliError> {
    let id = parse_record_id(id)?;
    if engine.tasks.fetch_record(&id).await?.is_none() {
        return Err(CliError::RecordNotFound(id.to_string()));
    }

    let updated = engine.tasks.update_status(&id, status).await?;
    println!("{updated} -> {}", status.trim());
    Ok(())
}
