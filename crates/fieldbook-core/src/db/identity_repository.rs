//! Identity map repository implementation

use crate::error::Result;
use rusqlite::{params, Connection};

/// Trait for persisted temp-to-real id mappings
pub trait IdentityRepository {
    /// Record a mapping. Append-only: an existing mapping for the temp id is
    /// kept and the call is a no-op returning `false`.
    fn insert(&self, temp_id: &str, real_id: &str) -> Result<bool>;

    /// Forward lookup.
    fn real_id(&self, temp_id: &str) -> Result<Option<String>>;

    /// Reverse lookup.
    fn temp_id(&self, real_id: &str) -> Result<Option<String>>;

    /// All mappings, for warming the in-memory cache at startup.
    fn all(&self) -> Result<Vec<(String, String)>>;
}

/// `SQLite` implementation of `IdentityRepository`
pub struct SqliteIdentityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteIdentityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl IdentityRepository for SqliteIdentityRepository<'_> {
    fn insert(&self, temp_id: &str, real_id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO identity_map (temp_id, real_id, created_at) VALUES (?, ?, ?)",
            params![temp_id, real_id, crate::util::unix_millis_now()],
        )?;
        Ok(rows > 0)
    }

    fn real_id(&self, temp_id: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT real_id FROM identity_map WHERE temp_id = ?",
            params![temp_id],
            |row| row.get(0),
        );
        match result {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn temp_id(&self, real_id: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT temp_id FROM identity_map WHERE real_id = ?",
            params![real_id],
            |row| row.get(0),
        );
        match result {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn all(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT temp_id, real_id FROM identity_map")?;
        let mappings = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(mappings)
    }
}
