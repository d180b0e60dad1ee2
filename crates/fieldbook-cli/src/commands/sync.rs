use std::path::Path;

use fieldbook_core::sync::SyncEvent;

use crate::commands::common::open_app;
use crate::error::CliError;

pub async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let app = open_app(db_path).await?;
    let sync = app.synchronizer()?;
    let mut events = sync.subscribe();

    let summary = sync.drain().await?;
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::IdRemapped { temp_id, real_id } => {
                println!("Resolved {temp_id} -> {real_id}");
            }
            SyncEvent::UploadComplete { image_id, new_entity_id, .. } => {
                println!("Photo {image_id} now filed under {new_entity_id}");
            }
            SyncEvent::CacheInvalidated { .. } => {}
        }
    }

    println!(
        "Synced {}, rejected {}, held back {}, retried {}",
        summary.synced, summary.rejected, summary.held_back, summary.retried
    );
    if let Some(delay) = summary.retry_after {
        println!("Transient failures; run sync again in {}s", delay.as_secs());
    }
    Ok(())
}
