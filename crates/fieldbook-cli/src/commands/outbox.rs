use std::path::Path;

use serde::Serialize;

use crate::commands::common::open_app;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct OutboxListItem {
    pub request_id: String,
    pub op: String,
    pub endpoint: String,
    pub temp_id: Option<String>,
    pub depends_on: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
}

pub async fn run_outbox(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let app = open_app(db_path).await?;
    let requests = app.outbox.dequeue_batch(500).await?;

    if as_json {
        let items: Vec<OutboxListItem> = requests
            .iter()
            .map(|request| OutboxListItem {
                request_id: request.request_id.to_string(),
                op: request.op.as_str().to_string(),
                endpoint: request.endpoint.clone(),
                temp_id: request.temp_id.clone(),
                depends_on: request.depends_on_temp_id.clone(),
                attempts: request.attempts,
                last_error: request.last_error.clone(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for request in &requests {
            let dep = request
                .depends_on_temp_id
                .as_deref()
                .map(|dep| format!("  waits-on: {dep}"))
                .unwrap_or_default();
            println!(
                "{}  {} {}{dep}",
                request.request_id,
                request.op.as_str(),
                request.endpoint
            );
        }
        let counts = app.outbox.counts().await?;
        println!("{} pending, {} failed", counts.pending, counts.failed);
    }
    Ok(())
}

pub async fn run_retry(db_path: &Path) -> Result<(), CliError> {
    let app = open_app(db_path).await?;
    let requeued = app.outbox.requeue_failed().await?;
    println!("Re-queued {requeued} failed requests");
    Ok(())
}
