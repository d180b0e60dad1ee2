//! Local image store: blob persistence, display resolution, upload queueing.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde_json::json;

use crate::annotate;
use crate::capture::{CapturedFile, CompressionOptions, ImageCompressor};
use crate::db::{Db, ImageRepository, SqliteImageRepository};
use crate::error::{Error, Result};
use crate::identity::IdentityMap;
use crate::models::{ImageId, ImageStatus, LocalImage, RequestOp, TempVisualId};
use crate::reactive::{ChangeBus, Table};
use crate::remote::RemoteApi;
use crate::stores::outbox::Outbox;

/// Remote table for photo attachments.
pub const ATTACH_TABLE: &str = "attach";

/// Fallback displayed when no source at all is available.
pub const PLACEHOLDER_URL: &str = "asset://photo-placeholder.png";

/// Timeout for live remote lookups that must never hang the page.
const REMOTE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Async handle over images and their blobs.
#[derive(Clone)]
pub struct ImageStore {
    db: Db,
    bus: ChangeBus,
    outbox: Outbox,
    identity: IdentityMap,
    compressor: Arc<dyn ImageCompressor>,
    remote: Arc<dyn RemoteApi>,
}

impl ImageStore {
    /// Create a handle.
    #[must_use]
    pub fn new(
        db: Db,
        bus: ChangeBus,
        outbox: Outbox,
        identity: IdentityMap,
        compressor: Arc<dyn ImageCompressor>,
        remote: Arc<dyn RemoteApi>,
    ) -> Self {
        Self {
            db,
            bus,
            outbox,
            identity,
            compressor,
            remote,
        }
    }

    /// Store a captured photo locally and queue its upload. Succeeds with
    /// zero connectivity; the network is never touched here.
    ///
    /// Zero-byte captures (seen on some gallery multi-selects) are rejected
    /// so a broken file is skipped instead of stored.
    pub async fn capture_image(
        &self,
        file: &CapturedFile,
        entity_type: &str,
        entity_id: &str,
        service_id: &str,
        caption: &str,
    ) -> Result<LocalImage> {
        if file.bytes.is_empty() {
            return Err(Error::Capture(format!(
                "Zero-byte capture skipped: {}",
                file.file_name
            )));
        }

        let compressed = self
            .compressor
            .compress(&file.bytes, CompressionOptions::default())
            .await?;

        let mut image =
            LocalImage::captured(entity_type, entity_id, service_id, crate::models::BlobId::new(), caption)?;
        image.status = ImageStatus::Queued;

        self.db
            .with({
                let image = image.clone();
                move |db| SqliteImageRepository::new(db.connection()).insert(&image, &compressed)
            })
            .await?;

        let depends_on = TempVisualId::is_temp(entity_id).then(|| entity_id.to_string());
        self.outbox
            .enqueue(
                RequestOp::Create,
                ATTACH_TABLE,
                json!({
                    "EntityType": entity_type,
                    "EntityID": entity_id,
                    "ServiceID": service_id,
                    "Annotation": caption,
                    "ObjectKey": object_key(service_id, &image.image_id),
                }),
                Some(image.image_id.as_str().to_string()),
                depends_on,
            )
            .await?;

        tracing::info!(image_id = %image.image_id, entity_id, "Captured photo locally");
        self.publish(service_id, vec![image.image_id.as_str().to_string()]);
        Ok(image)
    }

    /// Get an image by its stable id.
    pub async fn get(&self, image_id: &ImageId) -> Result<Option<LocalImage>> {
        self.db
            .with({
                let image_id = image_id.clone();
                move |db| SqliteImageRepository::new(db.connection()).get(&image_id)
            })
            .await
    }

    /// Photos for an entity, looked up under every id form currently valid
    /// for it (the id itself plus its temp/real counterpart), deduplicated
    /// by stable image id.
    pub async fn images_for_entity(&self, entity_id: &str) -> Result<Vec<LocalImage>> {
        let forms = self.identity.all_forms(entity_id);
        let mut images = self
            .db
            .with(move |db| SqliteImageRepository::new(db.connection()).list_for_entities(&forms))
            .await?;
        images.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        images.dedup_by(|a, b| a.image_id == b.image_id);
        Ok(images)
    }

    /// All images for a service.
    pub async fn images_for_service(&self, service_id: &str) -> Result<Vec<LocalImage>> {
        self.db
            .with({
                let service_id = service_id.to_string();
                move |db| SqliteImageRepository::new(db.connection()).list_for_service(&service_id)
            })
            .await
    }

    /// Local photo count for an entity across all its id forms.
    pub async fn count_for_entity(&self, entity_id: &str) -> Result<i64> {
        let forms = self.identity.all_forms(entity_id);
        self.db
            .with(move |db| SqliteImageRepository::new(db.connection()).count_for_entities(&forms))
            .await
    }

    /// Remote attachment count for a synced visual, degrading to zero on
    /// timeout or error rather than hanging the page.
    pub async fn remote_photo_count(&self, visual_id: &str) -> i64 {
        let filter = json!({ "EntityID": visual_id });
        let lookup = self.remote.list(ATTACH_TABLE, &filter);
        match tokio::time::timeout(REMOTE_LOOKUP_TIMEOUT, lookup).await {
            Ok(Ok(records)) => records.len() as i64,
            Ok(Err(error)) => {
                tracing::debug!(visual_id, %error, "Remote photo count failed; using 0");
                0
            }
            Err(_) => {
                tracing::debug!(visual_id, "Remote photo count timed out; using 0");
                0
            }
        }
    }

    /// Resolve something renderable for a photo. Never errors.
    ///
    /// Order: local blob, then a live signed URL for the uploaded copy
    /// (bounded by a timeout), then the placeholder.
    pub async fn display_url(&self, image: &LocalImage) -> String {
        if let Some(blob_id) = &image.local_blob_id {
            let exists = self
                .db
                .with({
                    let blob_id = blob_id.clone();
                    move |db| {
                        SqliteImageRepository::new(db.connection())
                            .blob_bytes(&blob_id)
                            .map(|b| b.is_some())
                    }
                })
                .await
                .unwrap_or(false);
            if exists {
                return format!("blob://{blob_id}");
            }
        }

        if let Some(key) = &image.remote_key {
            let lookup = self.remote.signed_file_url(key);
            match tokio::time::timeout(REMOTE_LOOKUP_TIMEOUT, lookup).await {
                Ok(Ok(url)) => return url,
                Ok(Err(error)) => {
                    tracing::debug!(image_id = %image.image_id, %error, "Signed URL fetch failed");
                }
                Err(_) => {
                    tracing::debug!(image_id = %image.image_id, "Signed URL fetch timed out");
                }
            }
        }

        PLACEHOLDER_URL.to_string()
    }

    /// Raw bytes of the local copy, when still present.
    pub async fn blob_bytes(&self, image: &LocalImage) -> Result<Option<Vec<u8>>> {
        let Some(blob_id) = image.local_blob_id.clone() else {
            return Ok(None);
        };
        self.db
            .with(move |db| SqliteImageRepository::new(db.connection()).blob_bytes(&blob_id))
            .await
    }

    /// Update the caption locally and queue the remote update. Always queued,
    /// never a direct call: the synchronizer resolves the photo's current id
    /// at drain time.
    pub async fn update_caption(&self, image_id: &ImageId, caption: &str) -> Result<()> {
        let image = self.require(image_id).await?;
        self.db
            .with({
                let image_id = image_id.clone();
                let caption = caption.to_string();
                move |db| {
                    SqliteImageRepository::new(db.connection()).set_caption(&image_id, &caption)
                }
            })
            .await?;

        self.outbox
            .enqueue(
                RequestOp::Update,
                ATTACH_TABLE,
                json!({ "Annotation": caption }),
                Some(image_id.as_str().to_string()),
                None,
            )
            .await?;
        self.publish(&image.service_id, vec![image_id.as_str().to_string()]);
        Ok(())
    }

    /// Persist an annotation editor result: enforce the compressed size cap,
    /// store drawings and caption, queue the remote update.
    pub async fn save_annotation(
        &self,
        image_id: &ImageId,
        annotation_data: &serde_json::Value,
        caption: &str,
    ) -> Result<()> {
        let compressed = annotate::compress_drawings(annotation_data)?;
        let image = self.require(image_id).await?;

        self.db
            .with({
                let image_id = image_id.clone();
                let compressed = compressed.clone();
                let caption = caption.to_string();
                move |db| {
                    let repo = SqliteImageRepository::new(db.connection());
                    repo.set_drawings(&image_id, Some(&compressed))?;
                    repo.set_caption(&image_id, &caption)
                }
            })
            .await?;

        self.outbox
            .enqueue(
                RequestOp::Update,
                ATTACH_TABLE,
                json!({
                    "Annotation": caption,
                    "Drawings": base64::engine::general_purpose::STANDARD.encode(&compressed),
                }),
                Some(image_id.as_str().to_string()),
                None,
            )
            .await?;
        self.publish(&image.service_id, vec![image_id.as_str().to_string()]);
        Ok(())
    }

    /// Delete a photo. If it was already synced, a remote delete is queued
    /// before the local rows go away; any not-yet-synced requests for the
    /// photo (its upload, caption edits) are cancelled instead of left to
    /// fail at drain time.
    pub async fn delete_image(&self, image_id: &ImageId) -> Result<()> {
        let image = self.require(image_id).await?;

        self.outbox.cancel_for_temp(image_id.as_str()).await?;
        if let Some(attach_id) = &image.attach_id {
            self.outbox
                .enqueue(
                    RequestOp::Delete,
                    ATTACH_TABLE,
                    json!({ "AttachID": attach_id }),
                    None,
                    None,
                )
                .await?;
        }

        self.db
            .with({
                let image_id = image_id.clone();
                move |db| SqliteImageRepository::new(db.connection()).delete(&image_id)
            })
            .await?;
        self.publish(&image.service_id, vec![image_id.as_str().to_string()]);
        Ok(())
    }

    /// Record that the UI confirmed the remote-rendered copy loaded. Only
    /// after this is the local blob eligible for pruning.
    pub async fn mark_remote_loaded_in_ui(&self, image_id: &ImageId) -> Result<()> {
        self.db
            .with({
                let image_id = image_id.clone();
                move |db| SqliteImageRepository::new(db.connection()).set_remote_loaded(&image_id)
            })
            .await
    }

    /// Reclaim local storage for one photo, honoring the prune gate.
    /// Returns whether bytes were actually dropped.
    pub async fn prune_local_blob(&self, image_id: &ImageId) -> Result<bool> {
        let pruned = self
            .db
            .with({
                let image_id = image_id.clone();
                move |db| SqliteImageRepository::new(db.connection()).prune_blob(&image_id)
            })
            .await?;
        if pruned {
            let image = self.require(image_id).await?;
            self.publish(&image.service_id, vec![image_id.as_str().to_string()]);
        }
        Ok(pruned)
    }

    /// Rewrite the owning entity id for every photo filed under
    /// `old_entity_id`, all-or-nothing. Returns the rehomed image ids.
    pub async fn rehome_entity(
        &self,
        service_id: &str,
        old_entity_id: &str,
        new_entity_id: &str,
    ) -> Result<Vec<ImageId>> {
        let rehomed = self
            .db
            .with({
                let old_entity_id = old_entity_id.to_string();
                let new_entity_id = new_entity_id.to_string();
                move |db| {
                    SqliteImageRepository::new(db.connection())
                        .rehome(&old_entity_id, &new_entity_id)
                }
            })
            .await?;
        if !rehomed.is_empty() {
            self.publish(
                service_id,
                rehomed.iter().map(|id| id.as_str().to_string()).collect(),
            );
        }
        Ok(rehomed)
    }

    /// Record the remote confirmation for an uploaded photo.
    pub async fn confirm_upload(
        &self,
        image_id: &ImageId,
        attach_id: &str,
        remote_key: &str,
    ) -> Result<()> {
        let image = self.require(image_id).await?;
        self.db
            .with({
                let image_id = image_id.clone();
                let attach_id = attach_id.to_string();
                let remote_key = remote_key.to_string();
                move |db| {
                    SqliteImageRepository::new(db.connection()).set_remote(
                        &image_id,
                        &attach_id,
                        &remote_key,
                    )
                }
            })
            .await?;
        self.publish(&image.service_id, vec![image_id.as_str().to_string()]);
        Ok(())
    }

    /// Transition a photo's sync status.
    pub async fn set_status(&self, image_id: &ImageId, status: ImageStatus) -> Result<()> {
        let image = self.require(image_id).await?;
        self.db
            .with({
                let image_id = image_id.clone();
                move |db| SqliteImageRepository::new(db.connection()).set_status(&image_id, status)
            })
            .await?;
        self.publish(&image.service_id, vec![image_id.as_str().to_string()]);
        Ok(())
    }

    async fn require(&self, image_id: &ImageId) -> Result<LocalImage> {
        self.get(image_id)
            .await?
            .ok_or_else(|| Error::NotFound(image_id.to_string()))
    }

    fn publish(&self, service_id: &str, keys: Vec<String>) {
        self.bus.publish_keys(Table::Images, service_id, keys);
    }
}

/// Remote object key for a photo upload.
fn object_key(service_id: &str, image_id: &ImageId) -> String {
    format!("services/{service_id}/photos/{image_id}.jpg")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StandardCompressor;
    use crate::remote::MemoryRemote;
    use serde_json::json;
    use std::io::Cursor;

    fn jpeg_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(320, 240, image::Rgb([120, 90, 60]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Jpeg)
            .unwrap();
        out
    }

    async fn setup() -> (ImageStore, Outbox, Arc<MemoryRemote>) {
        let db = Db::open_in_memory().unwrap();
        let bus = ChangeBus::default();
        let outbox = Outbox::new(db.clone(), bus.clone());
        let identity = IdentityMap::load(db.clone(), bus.clone()).await.unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let store = ImageStore::new(
            db,
            bus,
            outbox.clone(),
            identity,
            Arc::new(StandardCompressor),
            remote.clone(),
        );
        (store, outbox, remote)
    }

    #[tokio::test]
    async fn capture_stores_locally_and_queues_upload() {
        let (store, outbox, _) = setup().await;
        let file = CapturedFile::new("photo.jpg", jpeg_bytes());

        let image = store
            .capture_image(&file, "visual", "temp_visual_a", "svc", "")
            .await
            .unwrap();
        assert_eq!(image.status, ImageStatus::Queued);

        let batch = outbox.dequeue_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].op, RequestOp::Create);
        assert_eq!(batch[0].temp_id.as_deref(), Some(image.image_id.as_str()));
        // Upload is held back until the parent visual's create confirms.
        assert_eq!(batch[0].depends_on_temp_id.as_deref(), Some("temp_visual_a"));
    }

    #[tokio::test]
    async fn capture_rejects_zero_byte_file() {
        let (store, outbox, _) = setup().await;
        let file = CapturedFile::new("broken.jpg", Vec::new());

        let result = store
            .capture_image(&file, "visual", "temp_visual_a", "svc", "")
            .await;
        assert!(matches!(result, Err(Error::Capture(_))));
        assert!(outbox.dequeue_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn display_url_prefers_local_blob() {
        let (store, _, _) = setup().await;
        let file = CapturedFile::new("photo.jpg", jpeg_bytes());
        let image = store
            .capture_image(&file, "visual", "VIS-1", "svc", "")
            .await
            .unwrap();

        let url = store.display_url(&image).await;
        assert!(url.starts_with("blob://"));
    }

    #[tokio::test]
    async fn display_url_degrades_to_placeholder() {
        let (store, _, remote) = setup().await;
        remote.set_offline(true);
        let mut orphan =
            LocalImage::captured("visual", "VIS-1", "svc", crate::models::BlobId::new(), "")
                .unwrap();
        // Blob never stored, remote unreachable.
        orphan.local_blob_id = None;
        orphan.remote_key = Some("services/svc/photos/x.jpg".to_string());

        assert_eq!(store.display_url(&orphan).await, PLACEHOLDER_URL);
    }

    #[tokio::test]
    async fn caption_edit_is_queued_not_direct() {
        let (store, outbox, remote) = setup().await;
        let file = CapturedFile::new("photo.jpg", jpeg_bytes());
        let image = store
            .capture_image(&file, "visual", "VIS-1", "svc", "")
            .await
            .unwrap();

        store.update_caption(&image.image_id, "North wall").await.unwrap();

        let fetched = store.get(&image.image_id).await.unwrap().unwrap();
        assert_eq!(fetched.caption, "North wall");
        // Two queued requests (create + caption update), zero remote calls.
        assert_eq!(outbox.dequeue_batch(10).await.unwrap().len(), 2);
        assert!(remote.records(ATTACH_TABLE).is_empty());
    }

    #[tokio::test]
    async fn save_annotation_enforces_cap() {
        let (store, _, _) = setup().await;
        let file = CapturedFile::new("photo.jpg", jpeg_bytes());
        let image = store
            .capture_image(&file, "visual", "VIS-1", "svc", "")
            .await
            .unwrap();

        store
            .save_annotation(&image.image_id, &json!({"strokes": [1, 2, 3]}), "marked")
            .await
            .unwrap();
        let fetched = store.get(&image.image_id).await.unwrap().unwrap();
        assert!(fetched.has_drawings());
        assert_eq!(fetched.caption, "marked");

        let noise: Vec<u64> = (0..200_000u64).map(|i| i.wrapping_mul(2_654_435_761)).collect();
        let result = store
            .save_annotation(&image.image_id, &json!({ "strokes": noise }), "x")
            .await;
        assert!(matches!(result, Err(Error::AnnotationTooLarge { .. })));
        // Oversized save rejected without touching stored state.
        let unchanged = store.get(&image.image_id).await.unwrap().unwrap();
        assert_eq!(unchanged.caption, "marked");
    }

    #[tokio::test]
    async fn delete_synced_image_queues_remote_delete() {
        let (store, outbox, _) = setup().await;
        let file = CapturedFile::new("photo.jpg", jpeg_bytes());
        let image = store
            .capture_image(&file, "visual", "VIS-1", "svc", "")
            .await
            .unwrap();
        store
            .confirm_upload(&image.image_id, "AT-1", "services/svc/photos/x.jpg")
            .await
            .unwrap();

        store.delete_image(&image.image_id).await.unwrap();
        assert!(store.get(&image.image_id).await.unwrap().is_none());

        let ops: Vec<_> = outbox
            .dequeue_batch(10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.op)
            .collect();
        assert!(ops.contains(&RequestOp::Delete));
    }

    #[tokio::test]
    async fn delete_unsynced_image_cancels_queued_upload() {
        let (store, outbox, _) = setup().await;
        let file = CapturedFile::new("photo.jpg", jpeg_bytes());
        let image = store
            .capture_image(&file, "visual", "temp_visual_a", "svc", "")
            .await
            .unwrap();
        store.update_caption(&image.image_id, "scrapped").await.unwrap();

        store.delete_image(&image.image_id).await.unwrap();

        // Upload and caption edit are withdrawn, no remote delete is queued.
        assert!(outbox.dequeue_batch(10).await.unwrap().is_empty());
        let counts = outbox.counts().await.unwrap();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.failed, 0);
    }

    #[tokio::test]
    async fn remote_photo_count_filters_by_entity() {
        let (store, _, remote) = setup().await;
        remote
            .create(ATTACH_TABLE, &json!({ "EntityID": "VIS-1" }))
            .await
            .unwrap();
        remote
            .create(ATTACH_TABLE, &json!({ "EntityID": "VIS-1" }))
            .await
            .unwrap();
        remote
            .create(ATTACH_TABLE, &json!({ "EntityID": "VIS-2" }))
            .await
            .unwrap();

        assert_eq!(store.remote_photo_count("VIS-1").await, 2);
        assert_eq!(store.remote_photo_count("VIS-9").await, 0);

        // Unreachable remote degrades to zero instead of erroring.
        remote.set_offline(true);
        assert_eq!(store.remote_photo_count("VIS-1").await, 0);
    }

    #[tokio::test]
    async fn images_for_service_spans_entities() {
        let (store, _, _) = setup().await;
        for (name, entity) in [("a.jpg", "VIS-1"), ("b.jpg", "VIS-2")] {
            store
                .capture_image(&CapturedFile::new(name, jpeg_bytes()), "visual", entity, "svc", "")
                .await
                .unwrap();
        }
        store
            .capture_image(
                &CapturedFile::new("c.jpg", jpeg_bytes()),
                "visual",
                "VIS-3",
                "other-svc",
                "",
            )
            .await
            .unwrap();

        assert_eq!(store.images_for_service("svc").await.unwrap().len(), 2);
        assert_eq!(store.images_for_service("other-svc").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rehome_moves_photos_between_id_forms() {
        let (store, _, _) = setup().await;
        let file = CapturedFile::new("photo.jpg", jpeg_bytes());
        store
            .capture_image(&file, "visual", "temp_visual_a", "svc", "")
            .await
            .unwrap();

        let rehomed = store
            .rehome_entity("svc", "temp_visual_a", "VIS-1")
            .await
            .unwrap();
        assert_eq!(rehomed.len(), 1);
        assert_eq!(store.images_for_entity("VIS-1").await.unwrap().len(), 1);
    }
}
