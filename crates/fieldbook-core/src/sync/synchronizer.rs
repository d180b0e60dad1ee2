//! Background synchronizer: drains the outbox against the remote API.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use tokio::sync::{broadcast, watch, Notify};

use crate::error::{Error, Result};
use crate::identity::IdentityMap;
use crate::models::{ImageId, ImageStatus, PendingRequest, RequestOp, TempVisualId};
use crate::remote::RemoteApi;
use crate::stores::{FieldStore, ImageStore, Outbox, ATTACH_TABLE, VISUALS_TABLE};
use crate::sync::backoff::BackoffPolicy;
use crate::sync::{SyncEvent, SyncStatus};

/// Tuning knobs for the drain loop.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Interval between automatic drains.
    pub drain_interval: Duration,
    /// Maximum outbox items taken per pass.
    pub batch_size: usize,
    /// Retry schedule for transient failures.
    pub backoff: BackoffPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(30),
            batch_size: 25,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Requests confirmed by the remote.
    pub synced: usize,
    /// Requests permanently rejected.
    pub rejected: usize,
    /// Requests left pending because a dependency is unresolved.
    pub held_back: usize,
    /// Requests returned to pending after a transient failure.
    pub retried: usize,
    /// Backoff delay to wait before the next drain; set when the pass ended
    /// on a transient failure. The pass itself never sleeps.
    pub retry_after: Option<Duration>,
}

enum Disposition {
    /// Ready to send, with the record id for update/delete ops.
    Ready(Option<String>),
    /// Dependency not resolved yet; leave the item pending.
    HoldBack,
}

/// Drains pending requests, resolves temp identities, re-homes photos.
pub struct Synchronizer {
    outbox: Outbox,
    fields: FieldStore,
    images: ImageStore,
    identity: IdentityMap,
    remote: Arc<dyn RemoteApi>,
    options: SyncOptions,
    events: broadcast::Sender<SyncEvent>,
    status_tx: watch::Sender<SyncStatus>,
    kick: Notify,
}

impl Synchronizer {
    /// Create a synchronizer over the stores and remote.
    #[must_use]
    pub fn new(
        outbox: Outbox,
        fields: FieldStore,
        images: ImageStore,
        identity: IdentityMap,
        remote: Arc<dyn RemoteApi>,
        options: SyncOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let (status_tx, _) = watch::channel(SyncStatus::default());
        Self {
            outbox,
            fields,
            images,
            identity,
            remote,
            options,
            events,
            status_tx,
            kick: Notify::new(),
        }
    }

    /// Subscribe to sync lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Watch the syncing flag and queue depths.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Request an immediate drain from the running loop.
    pub fn request_drain(&self) {
        self.kick.notify_one();
    }

    /// Run drains forever: on the configured interval and on demand.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.options.drain_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = self.kick.notified() => {}
            }
            match self.drain().await {
                Ok(summary) => {
                    // Backoff waits happen here, between drains, so the
                    // syncing flag drops as soon as the pass ends.
                    if let Some(delay) = summary.retry_after {
                        tracing::debug!(?summary, retry_in = ?delay, "Transient failures; retrying after backoff");
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = self.kick.notified() => {}
                        }
                        self.kick.notify_one();
                    }
                }
                Err(error) => tracing::error!(%error, "Drain pass failed"),
            }
        }
    }

    /// Drain the outbox, oldest first, until a pass makes no progress.
    ///
    /// Multiple passes let an item held back behind a parent create go out as
    /// soon as that create resolves. Rejections are marked failed and skipped
    /// without halting the queue; the first transient failure ends the drain,
    /// since the remote is likely unreachable for every later item too. The
    /// backoff delay is reported in the summary, not served here, so callers
    /// see the pass end immediately.
    pub async fn drain(&self) -> Result<DrainSummary> {
        self.publish_status(true).await?;
        let result = self.drain_until_stalled().await;
        // Counts refresh even when the pass errored out.
        self.publish_status(false).await?;

        let summary = result?;
        if summary.synced > 0 {
            let _ = self
                .events
                .send(SyncEvent::CacheInvalidated { service_id: None });
        }
        Ok(summary)
    }

    async fn drain_until_stalled(&self) -> Result<DrainSummary> {
        let mut total = DrainSummary::default();
        loop {
            let pass = self.drain_batch().await?;
            total.synced += pass.synced;
            total.rejected += pass.rejected;
            total.retried += pass.retried;
            total.retry_after = pass.retry_after;
            // Held-back counts don't accumulate: only what is still stuck
            // after the final pass matters.
            total.held_back = pass.held_back;
            if pass.synced == 0 || pass.retried > 0 {
                return Ok(total);
            }
        }
    }

    async fn drain_batch(&self) -> Result<DrainSummary> {
        let batch = self.outbox.dequeue_batch(self.options.batch_size).await?;
        let mut summary = DrainSummary::default();

        for request in batch {
            // Dependency state may have been resolved by an earlier item in
            // this same pass, so the check happens per item, not per batch.
            let record_id = match self.disposition(&request).await? {
                Disposition::Ready(record_id) => record_id,
                Disposition::HoldBack => {
                    summary.held_back += 1;
                    continue;
                }
            };

            self.outbox.mark_syncing(&request.request_id).await?;
            match self.dispatch(&request, record_id.as_deref()).await {
                Ok(()) => {
                    self.outbox.mark_synced(&request.request_id).await?;
                    summary.synced += 1;
                }
                Err(error) if error.is_retryable() => {
                    let message = error.to_string();
                    self.outbox.mark_retry(&request.request_id, &message).await?;
                    summary.retried += 1;
                    let delay = self
                        .options
                        .backoff
                        .delay(u32::try_from(request.attempts).unwrap_or(u32::MAX).saturating_add(1));
                    summary.retry_after = Some(delay);
                    tracing::warn!(
                        request_id = %request.request_id,
                        error = %message,
                        retry_in = ?delay,
                        "Transient remote failure; ending pass"
                    );
                    break;
                }
                Err(error) => {
                    let message = error.to_string();
                    self.outbox.mark_failed(&request.request_id, &message).await?;
                    summary.rejected += 1;
                    tracing::error!(
                        request_id = %request.request_id,
                        error = %message,
                        "Request rejected by remote"
                    );
                }
            }
        }
        Ok(summary)
    }

    /// Decide whether a request can go out now, and under which record id.
    async fn disposition(&self, request: &PendingRequest) -> Result<Disposition> {
        if let Some(dep) = &request.depends_on_temp_id {
            if self.identity.real_id_or_db(dep).await?.is_none() {
                return Ok(Disposition::HoldBack);
            }
        }

        match request.op {
            RequestOp::Create => Ok(Disposition::Ready(None)),
            RequestOp::Update | RequestOp::Delete if request.endpoint == ATTACH_TABLE => {
                let Some(temp_id) = &request.temp_id else {
                    return Ok(Disposition::Ready(self.record_id_from_payload(request)));
                };
                let image_id = ImageId::parse(temp_id.clone())?;
                match self.images.get(&image_id).await? {
                    // Upload hasn't confirmed yet; the edit rides behind it.
                    Some(image) => match image.attach_id {
                        Some(attach_id) => Ok(Disposition::Ready(Some(attach_id))),
                        None => Ok(Disposition::HoldBack),
                    },
                    None => Err(Error::remote_rejected(format!(
                        "Photo {image_id} no longer exists locally"
                    ))),
                }
            }
            RequestOp::Update | RequestOp::Delete => {
                let raw = request
                    .temp_id
                    .clone()
                    .or_else(|| self.record_id_from_payload(request))
                    .ok_or_else(|| {
                        Error::remote_rejected("Update/delete request carries no record id")
                    })?;
                if TempVisualId::is_temp(&raw) {
                    match self.identity.real_id_or_db(&raw).await? {
                        Some(real) => Ok(Disposition::Ready(Some(real))),
                        None => Ok(Disposition::HoldBack),
                    }
                } else {
                    Ok(Disposition::Ready(Some(raw)))
                }
            }
        }
    }

    fn record_id_from_payload(&self, request: &PendingRequest) -> Option<String> {
        for key in ["AttachID", "VisualID", "RecordID"] {
            if let Some(id) = request.payload.get(key).and_then(|v| v.as_str()) {
                return Some(id.to_string());
            }
        }
        None
    }

    async fn dispatch(&self, request: &PendingRequest, record_id: Option<&str>) -> Result<()> {
        let payload = self.redirect_temp_ids(request.payload.clone()).await?;
        match request.op {
            RequestOp::Create if request.endpoint == ATTACH_TABLE => {
                self.upload_photo(request, payload).await
            }
            RequestOp::Create => self.create_record(request, payload).await,
            RequestOp::Update => {
                let record_id = record_id.ok_or_else(|| {
                    Error::remote_rejected("Update request resolved to no record id")
                })?;
                self.remote
                    .update(&request.endpoint, record_id, &payload)
                    .await
            }
            RequestOp::Delete => {
                let record_id = record_id.ok_or_else(|| {
                    Error::remote_rejected("Delete request resolved to no record id")
                })?;
                self.remote.delete(&request.endpoint, record_id).await
            }
        }
    }

    /// Rewrite any temp entity id in the payload to its confirmed real id.
    /// Queued payloads keep their temp ids at rest; redirection happens only
    /// here, at drain time.
    async fn redirect_temp_ids(&self, mut payload: serde_json::Value) -> Result<serde_json::Value> {
        if let Some(object) = payload.as_object_mut() {
            for value in object.values_mut() {
                let Some(raw) = value.as_str() else { continue };
                if !TempVisualId::is_temp(raw) {
                    continue;
                }
                if let Some(real) = self.identity.real_id_or_db(raw).await? {
                    *value = serde_json::Value::String(real);
                }
            }
        }
        Ok(payload)
    }

    /// Create a parent record, then resolve the temp identity everywhere:
    /// identity map first, then fields, then photo re-home, then events,
    /// in that order.
    async fn create_record(
        &self,
        request: &PendingRequest,
        payload: serde_json::Value,
    ) -> Result<()> {
        let real_id = self.remote.create(&request.endpoint, &payload).await?;
        let Some(temp_id) = &request.temp_id else {
            return Ok(());
        };
        if request.endpoint != VISUALS_TABLE {
            return Ok(());
        }

        self.identity.record(temp_id, &real_id).await?;
        let changed = self.fields.resolve_temp(temp_id, &real_id).await?;
        let service_id = changed
            .first()
            .map(|field| field.service_id.clone())
            .unwrap_or_default();
        let rehomed = self
            .images
            .rehome_entity(&service_id, temp_id, &real_id)
            .await?;

        let _ = self.events.send(SyncEvent::IdRemapped {
            temp_id: temp_id.clone(),
            real_id: real_id.clone(),
        });
        for image_id in rehomed {
            let _ = self.events.send(SyncEvent::UploadComplete {
                image_id,
                old_entity_id: temp_id.clone(),
                new_entity_id: real_id.clone(),
            });
        }
        tracing::info!(temp_id, real_id, "Resolved temp identity");
        Ok(())
    }

    /// Upload a photo's local bytes and record the remote confirmation.
    async fn upload_photo(
        &self,
        request: &PendingRequest,
        mut payload: serde_json::Value,
    ) -> Result<()> {
        let image_id = ImageId::parse(
            request
                .temp_id
                .clone()
                .ok_or_else(|| Error::remote_rejected("Photo upload request carries no image id"))?,
        )?;
        let image = self
            .images
            .get(&image_id)
            .await?
            .ok_or_else(|| Error::remote_rejected(format!("Photo {image_id} was deleted")))?;
        let bytes = self
            .images
            .blob_bytes(&image)
            .await?
            .ok_or_else(|| Error::remote_rejected(format!("Photo {image_id} has no local copy")))?;

        self.images.set_status(&image_id, ImageStatus::Uploading).await?;
        if let Some(object) = payload.as_object_mut() {
            object.insert(
                "FileData".to_string(),
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(&bytes)),
            );
        }

        let result = self.remote.create(&request.endpoint, &payload).await;
        match result {
            Ok(attach_id) => {
                let key = payload
                    .get("ObjectKey")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                self.images.confirm_upload(&image_id, &attach_id, &key).await?;
                tracing::info!(%image_id, attach_id, "Photo upload verified");
                Ok(())
            }
            Err(error) => {
                let status = if error.is_retryable() {
                    ImageStatus::Queued
                } else {
                    ImageStatus::Failed
                };
                self.images.set_status(&image_id, status).await?;
                Err(error)
            }
        }
    }

    async fn publish_status(&self, is_syncing: bool) -> Result<()> {
        let counts = self.outbox.counts().await?;
        let _ = self.status_tx.send(SyncStatus {
            is_syncing,
            pending: counts.pending,
            failed: counts.failed,
        });
        Ok(())
    }
}
