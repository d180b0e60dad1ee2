//! Shared database service wrapper used across stores.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::Database;
use crate::error::Result;

/// Thread-safe handle for repository operations.
///
/// All store-level code goes through [`Db::with`]; the closure runs with the
/// connection lock held, so multi-statement operations inside it are never
/// interleaved with other writers.
#[derive(Clone)]
pub struct Db {
    inner: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl Db {
    /// Open a database service at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = Database::open(&db_path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(Database::open_in_memory()?)),
            db_path: None,
        })
    }

    /// Filesystem path of the database, when file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Run a closure against the locked database.
    pub async fn with<R>(&self, f: impl FnOnce(&Database) -> Result<R>) -> Result<R> {
        let db = self.inner.lock().await;
        f(&db)
    }
}
