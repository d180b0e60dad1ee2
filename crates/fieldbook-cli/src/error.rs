use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldbook_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No field for template {0} in that category")]
    FieldNotFound(i64),
    #[error("No photo found for id: {0}")]
    PhotoNotFound(String),
    #[error("File is empty: {0}")]
    EmptyFile(String),
    #[error(
        "Remote is not configured. Set FIELDBOOK_API_URL (and optionally FIELDBOOK_API_TOKEN) to enable `fieldbook sync`."
    )]
    SyncNotConfigured,
}
