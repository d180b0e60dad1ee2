//! Durable outbox of not-yet-synced remote mutations.

use crate::db::{Db, OutboxCounts, OutboxRepository, SqliteOutboxRepository};
use crate::error::Result;
use crate::models::{PendingRequest, RequestId, RequestOp, RequestStatus};
use crate::reactive::{ChangeBus, Table, TableChange};

/// Async handle over the outbox table.
///
/// Caption and annotation edits are always queued through here, never sent as
/// direct blocking API calls, so an edit made seconds after a capture can
/// never lose a race with the photo's own upload.
#[derive(Clone)]
pub struct Outbox {
    db: Db,
    bus: ChangeBus,
}

impl Outbox {
    /// Create a handle.
    #[must_use]
    pub fn new(db: Db, bus: ChangeBus) -> Self {
        Self { db, bus }
    }

    /// Queue a mutation. Returns `None` when an equivalent CREATE was already
    /// queued for the same temp id (idempotent enqueue).
    pub async fn enqueue(
        &self,
        op: RequestOp,
        endpoint: &str,
        payload: serde_json::Value,
        temp_id: Option<String>,
        depends_on_temp_id: Option<String>,
    ) -> Result<Option<PendingRequest>> {
        let request = PendingRequest::new(op, endpoint, payload, temp_id, depends_on_temp_id)?;
        let inserted = self
            .db
            .with({
                let request = request.clone();
                move |db| SqliteOutboxRepository::new(db.connection()).insert(&request)
            })
            .await?;

        if !inserted {
            return Ok(None);
        }
        tracing::debug!(
            request_id = %request.request_id,
            op = request.op.as_str(),
            endpoint = %request.endpoint,
            "Queued outbox request"
        );
        self.publish(vec![request.request_id.as_str().to_string()]);
        Ok(Some(request))
    }

    /// Fetch up to `limit` pending requests, oldest first.
    pub async fn dequeue_batch(&self, limit: usize) -> Result<Vec<PendingRequest>> {
        self.db
            .with(move |db| SqliteOutboxRepository::new(db.connection()).pending_batch(limit))
            .await
    }

    /// Mark a request as currently replaying.
    pub async fn mark_syncing(&self, request_id: &RequestId) -> Result<()> {
        self.set_status(request_id, RequestStatus::Syncing, None).await
    }

    /// Mark a request confirmed by the remote.
    pub async fn mark_synced(&self, request_id: &RequestId) -> Result<()> {
        self.set_status(request_id, RequestStatus::Synced, None).await
    }

    /// Put a request back in the pending state for a later retry.
    pub async fn mark_retry(&self, request_id: &RequestId, error: &str) -> Result<()> {
        self.set_status(request_id, RequestStatus::Pending, Some(error))
            .await
    }

    /// Mark a request permanently failed (non-retryable rejection).
    pub async fn mark_failed(&self, request_id: &RequestId, error: &str) -> Result<()> {
        self.set_status(request_id, RequestStatus::Failed, Some(error))
            .await
    }

    /// Re-queue all failed requests (user retry affordance).
    pub async fn requeue_failed(&self) -> Result<usize> {
        let requeued = self
            .db
            .with(|db| SqliteOutboxRepository::new(db.connection()).requeue_failed())
            .await?;
        if requeued > 0 {
            self.publish(Vec::new());
        }
        Ok(requeued)
    }

    /// Drop every not-yet-synced request keyed to `temp_id`. Deleting an
    /// entity locally before its requests went out must not leave them to
    /// fail at drain time.
    pub async fn cancel_for_temp(&self, temp_id: &str) -> Result<usize> {
        let cancelled = self
            .db
            .with({
                let temp_id = temp_id.to_string();
                move |db| SqliteOutboxRepository::new(db.connection()).cancel_by_temp(&temp_id)
            })
            .await?;
        if cancelled > 0 {
            tracing::debug!(temp_id, cancelled, "Cancelled queued requests");
            self.publish(Vec::new());
        }
        Ok(cancelled)
    }

    /// Find the CREATE request for a temp id, if any.
    pub async fn find_create_by_temp(&self, temp_id: &str) -> Result<Option<PendingRequest>> {
        self.db
            .with({
                let temp_id = temp_id.to_string();
                move |db| {
                    SqliteOutboxRepository::new(db.connection()).find_create_by_temp(&temp_id)
                }
            })
            .await
    }

    /// Pending/failed counts for the sync status surface.
    pub async fn counts(&self) -> Result<OutboxCounts> {
        self.db
            .with(|db| SqliteOutboxRepository::new(db.connection()).counts())
            .await
    }

    async fn set_status(
        &self,
        request_id: &RequestId,
        status: RequestStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.db
            .with({
                let request_id = request_id.clone();
                let error = error.map(ToString::to_string);
                move |db| {
                    SqliteOutboxRepository::new(db.connection()).set_status(
                        &request_id,
                        status,
                        error.as_deref(),
                    )
                }
            })
            .await?;
        self.publish(vec![request_id.as_str().to_string()]);
        Ok(())
    }

    fn publish(&self, keys: Vec<String>) {
        self.bus.publish(TableChange {
            table: Table::Outbox,
            service_id: None,
            keys,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> Outbox {
        Outbox::new(Db::open_in_memory().unwrap(), ChangeBus::default())
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_for_creates() {
        let outbox = setup();
        let first = outbox
            .enqueue(
                RequestOp::Create,
                "visuals",
                json!({}),
                Some("temp_visual_a".to_string()),
                None,
            )
            .await
            .unwrap();
        assert!(first.is_some());

        let second = outbox
            .enqueue(
                RequestOp::Create,
                "visuals",
                json!({}),
                Some("temp_visual_a".to_string()),
                None,
            )
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(outbox.counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn status_transitions_publish_and_persist() {
        let outbox = setup();
        let request = outbox
            .enqueue(RequestOp::Update, "attach", json!({}), None, None)
            .await
            .unwrap()
            .unwrap();

        outbox.mark_syncing(&request.request_id).await.unwrap();
        outbox
            .mark_retry(&request.request_id, "timeout")
            .await
            .unwrap();
        assert_eq!(outbox.counts().await.unwrap().pending, 1);

        outbox
            .mark_failed(&request.request_id, "validation")
            .await
            .unwrap();
        let counts = outbox.counts().await.unwrap();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.failed, 1);

        assert_eq!(outbox.requeue_failed().await.unwrap(), 1);
        assert_eq!(outbox.counts().await.unwrap().pending, 1);
    }
}
