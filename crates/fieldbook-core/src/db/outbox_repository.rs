//! Outbox repository implementation

use crate::error::{Error, Result};
use crate::models::{PendingRequest, RequestId, RequestOp, RequestStatus};
use rusqlite::{params, Connection};

/// Pending/failed item counts for the sync status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutboxCounts {
    pub pending: usize,
    pub failed: usize,
}

/// Trait for outbox storage operations
pub trait OutboxRepository {
    /// Insert a request. A CREATE carrying a `temp_id` that already has a
    /// CREATE queued (or confirmed) is dropped to keep replays idempotent.
    /// Returns whether a row was inserted.
    fn insert(&self, request: &PendingRequest) -> Result<bool>;

    /// Fetch up to `limit` pending requests, oldest first.
    fn pending_batch(&self, limit: usize) -> Result<Vec<PendingRequest>>;

    /// Get a request by id.
    fn get(&self, request_id: &RequestId) -> Result<Option<PendingRequest>>;

    /// Find the CREATE request for a temp id, if any.
    fn find_create_by_temp(&self, temp_id: &str) -> Result<Option<PendingRequest>>;

    /// Transition a request's status, bumping attempts and recording errors.
    fn set_status(
        &self,
        request_id: &RequestId,
        status: RequestStatus,
        last_error: Option<&str>,
    ) -> Result<()>;

    /// Re-queue every failed request (user-initiated retry affordance).
    fn requeue_failed(&self) -> Result<usize>;

    /// Drop every not-yet-synced request keyed to `temp_id`. Used when the
    /// local entity behind the requests is deleted before a drain ran.
    fn cancel_by_temp(&self, temp_id: &str) -> Result<usize>;

    /// Pending/failed counts.
    fn counts(&self) -> Result<OutboxCounts>;
}

/// `SQLite` implementation of `OutboxRepository`
pub struct SqliteOutboxRepository<'a> {
    conn: &'a Connection,
}

const OUTBOX_COLUMNS: &str = "request_id, op, endpoint, payload, temp_id, depends_on_temp_id, \
     status, attempts, last_error, created_at";

impl<'a> SqliteOutboxRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingRequest> {
        let request_id: String = row.get(0)?;
        let op: String = row.get(1)?;
        let payload: String = row.get(3)?;
        let status: String = row.get(6)?;
        Ok(PendingRequest {
            request_id: RequestId::from_raw(request_id),
            op: RequestOp::parse(&op).unwrap_or(RequestOp::Update),
            endpoint: row.get(2)?,
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            temp_id: row.get(4)?,
            depends_on_temp_id: row.get(5)?,
            status: RequestStatus::parse(&status).unwrap_or(RequestStatus::Pending),
            attempts: row.get(7)?,
            last_error: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

impl OutboxRepository for SqliteOutboxRepository<'_> {
    fn insert(&self, request: &PendingRequest) -> Result<bool> {
        if request.op == RequestOp::Create {
            if let Some(temp_id) = &request.temp_id {
                if self.find_create_by_temp(temp_id)?.is_some() {
                    tracing::debug!(temp_id, "Skipping duplicate CREATE enqueue");
                    return Ok(false);
                }
            }
        }

        self.conn.execute(
            &format!(
                "INSERT INTO outbox ({OUTBOX_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                request.request_id.as_str(),
                request.op.as_str(),
                request.endpoint,
                serde_json::to_string(&request.payload)?,
                request.temp_id,
                request.depends_on_temp_id,
                request.status.as_str(),
                request.attempts,
                request.last_error,
                request.created_at,
            ],
        )?;
        Ok(true)
    }

    fn pending_batch(&self, limit: usize) -> Result<Vec<PendingRequest>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox
             WHERE status = 'pending'
             ORDER BY created_at ASC, request_id ASC
             LIMIT ?"
        ))?;
        let requests = stmt
            .query_map(params![limit as i64], Self::parse_request)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(requests)
    }

    fn get(&self, request_id: &RequestId) -> Result<Option<PendingRequest>> {
        let result = self.conn.query_row(
            &format!("SELECT {OUTBOX_COLUMNS} FROM outbox WHERE request_id = ?"),
            params![request_id.as_str()],
            Self::parse_request,
        );
        match result {
            Ok(request) => Ok(Some(request)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn find_create_by_temp(&self, temp_id: &str) -> Result<Option<PendingRequest>> {
        let result = self.conn.query_row(
            &format!(
                "SELECT {OUTBOX_COLUMNS} FROM outbox
                 WHERE op = 'create' AND temp_id = ?
                 ORDER BY created_at ASC
                 LIMIT 1"
            ),
            params![temp_id],
            Self::parse_request,
        );
        match result {
            Ok(request) => Ok(Some(request)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_status(
        &self,
        request_id: &RequestId,
        status: RequestStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let bump = i64::from(matches!(
            status,
            RequestStatus::Syncing | RequestStatus::Failed
        ));
        let rows = self.conn.execute(
            "UPDATE outbox SET status = ?, attempts = attempts + ?, last_error = ?
             WHERE request_id = ?",
            params![status.as_str(), bump, last_error, request_id.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(request_id.to_string()));
        }
        Ok(())
    }

    fn requeue_failed(&self) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE outbox SET status = 'pending', last_error = NULL WHERE status = 'failed'",
            [],
        )?;
        Ok(rows)
    }

    fn cancel_by_temp(&self, temp_id: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM outbox
             WHERE temp_id = ? AND status IN ('pending', 'syncing', 'failed')",
            params![temp_id],
        )?;
        Ok(rows)
    }

    fn counts(&self) -> Result<OutboxCounts> {
        let pending: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE status IN ('pending', 'syncing')",
            [],
            |row| row.get(0),
        )?;
        let failed: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE status = 'failed'",
            [],
            |row| row.get(0),
        )?;
        Ok(OutboxCounts {
            pending: usize::try_from(pending).unwrap_or(0),
            failed: usize::try_from(failed).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    fn create_request(temp_id: &str) -> PendingRequest {
        PendingRequest::new(
            RequestOp::Create,
            "visuals",
            json!({"Category": "Foundations"}),
            Some(temp_id.to_string()),
            None,
        )
        .unwrap()
    }

    #[test]
    fn duplicate_create_for_same_temp_id_is_dropped() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteOutboxRepository::new(db.connection());

        assert!(repo.insert(&create_request("temp_visual_a")).unwrap());
        assert!(!repo.insert(&create_request("temp_visual_a")).unwrap());
        assert!(repo.insert(&create_request("temp_visual_b")).unwrap());

        assert_eq!(repo.pending_batch(10).unwrap().len(), 2);
    }

    #[test]
    fn update_for_same_temp_id_is_kept() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteOutboxRepository::new(db.connection());

        repo.insert(&create_request("temp_visual_a")).unwrap();
        let update = PendingRequest::new(
            RequestOp::Update,
            "attach",
            json!({"Annotation": "North wall"}),
            Some("temp_visual_a".to_string()),
            None,
        )
        .unwrap();
        assert!(repo.insert(&update).unwrap());
        assert_eq!(repo.pending_batch(10).unwrap().len(), 2);
    }

    #[test]
    fn pending_batch_is_oldest_first_and_skips_done() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteOutboxRepository::new(db.connection());

        let first = create_request("temp_visual_a");
        let second = create_request("temp_visual_b");
        repo.insert(&first).unwrap();
        repo.insert(&second).unwrap();

        repo.set_status(&first.request_id, RequestStatus::Synced, None)
            .unwrap();
        let batch = repo.pending_batch(10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].request_id, second.request_id);
    }

    #[test]
    fn failed_items_requeue_and_count() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteOutboxRepository::new(db.connection());

        let request = create_request("temp_visual_a");
        repo.insert(&request).unwrap();
        repo.set_status(&request.request_id, RequestStatus::Failed, Some("409"))
            .unwrap();

        let counts = repo.counts().unwrap();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.failed, 1);

        assert_eq!(repo.requeue_failed().unwrap(), 1);
        let counts = repo.counts().unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.failed, 0);

        let requeued = repo.get(&request.request_id).unwrap().unwrap();
        assert_eq!(requeued.status, RequestStatus::Pending);
        assert!(requeued.last_error.is_none());
        assert_eq!(requeued.attempts, 1);
    }
}
