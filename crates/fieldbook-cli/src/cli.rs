use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fieldbook")]
#[command(about = "Offline-first field inspection data from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Inspection service id
    #[arg(long, global = true, default_value = "default")]
    pub service: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Seed a category's fields from a templates JSON file
    Seed {
        /// Category name
        category: String,
        /// Path to a JSON array of templates
        file: PathBuf,
    },
    /// List fields for a category
    Fields {
        /// Category name
        category: String,
        /// Include hidden rows
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Select or unselect a field
    Select {
        /// Category name
        category: String,
        /// Template id of the field
        template_id: i64,
        /// Unselect instead of select
        #[arg(long)]
        off: bool,
    },
    /// Set a field's answer
    Answer {
        /// Category name
        category: String,
        /// Template id of the field
        template_id: i64,
        /// Answer value; empty hides the row
        #[arg(default_value = "")]
        answer: String,
        /// Free-text "other" value
        #[arg(long, default_value = "")]
        other: String,
    },
    /// Attach photo files to a field
    Capture {
        /// Category name
        category: String,
        /// Template id of the field
        template_id: i64,
        /// Photo files to store
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List photos for a field
    Photos {
        /// Category name
        category: String,
        /// Template id of the field
        template_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit a photo caption
    Caption {
        /// Photo id (img_...)
        image_id: String,
        /// New caption
        caption: String,
    },
    /// Show queued outbox requests
    Outbox {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-queue failed outbox requests
    Retry,
    /// Drain the outbox against the remote API
    Sync,
    /// Show queue depths and identity mappings
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
