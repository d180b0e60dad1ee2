use std::path::Path;

use serde::Serialize;

use crate::commands::common::open_app;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub pending: usize,
    pub failed: usize,
    pub stored_photos: usize,
    pub identity_mappings: usize,
    pub remote_configured: bool,
}

pub async fn run_status(service: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let app = open_app(db_path).await?;
    let counts = app.outbox.counts().await?;
    let mappings = app.identity.mappings();
    let stored_photos = app.images.images_for_service(service).await?.len();

    let report = StatusReport {
        pending: counts.pending,
        failed: counts.failed,
        stored_photos,
        identity_mappings: mappings.len(),
        remote_configured: app.remote_configured,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Outbox: {} pending, {} failed", report.pending, report.failed);
        println!("Stored photos ({service}): {}", report.stored_photos);
        println!("Identity mappings: {}", report.identity_mappings);
        println!(
            "Remote: {}",
            if report.remote_configured {
                "configured"
            } else {
                "not configured (offline)"
            }
        );
        for (temp, real) in &mappings {
            println!("  {temp} -> {real}");
        }
    }
    Ok(())
}
