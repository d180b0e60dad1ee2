//! Fieldbook CLI - inspect and mutate the offline inspection database
//!
//! Every command works fully offline; `sync` drains the outbox when a remote
//! is configured via FIELDBOOK_API_URL.

use std::path::PathBuf;

use clap::Parser;

mod cli;
mod commands;
mod error;

use cli::{Cli, Commands};
use commands::fields::{run_answer, run_fields, run_seed, run_select};
use commands::outbox::{run_outbox, run_retry};
use commands::photos::{run_caption, run_capture, run_photos};
use commands::status::run_status;
use commands::sync::run_sync;
use error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fieldbook=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let service = cli.service.as_str();

    match cli.command {
        Commands::Seed { category, file } => {
            run_seed(service, &category, &file, &db_path).await?;
        }
        Commands::Fields { category, all, json } => {
            run_fields(service, &category, all, json, &db_path).await?;
        }
        Commands::Select {
            category,
            template_id,
            off,
        } => run_select(service, &category, template_id, off, &db_path).await?,
        Commands::Answer {
            category,
            template_id,
            answer,
            other,
        } => run_answer(service, &category, template_id, &answer, &other, &db_path).await?,
        Commands::Capture {
            category,
            template_id,
            files,
        } => run_capture(service, &category, template_id, &files, &db_path).await?,
        Commands::Photos {
            category,
            template_id,
            json,
        } => run_photos(service, &category, template_id, json, &db_path).await?,
        Commands::Caption { image_id, caption } => {
            run_caption(&image_id, &caption, &db_path).await?;
        }
        Commands::Outbox { json } => run_outbox(json, &db_path).await?,
        Commands::Retry => run_retry(&db_path).await?,
        Commands::Sync => run_sync(&db_path).await?,
        Commands::Status { json } => run_status(service, json, &db_path).await?,
    }
    Ok(())
}

fn resolve_db_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if let Ok(path) = std::env::var("FIELDBOOK_DB_PATH") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldbook")
        .join("fieldbook.db")
}
