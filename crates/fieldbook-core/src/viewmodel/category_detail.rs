//! Category detail page view-model.
//!
//! Owns the per-page item list, photo population, optimistic writes, and the
//! reload contract around background sync. All caches here are scoped to the
//! page and die with it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, Mutex, OnceCell};

use crate::annotate::{decompress_drawings, AnnotationOutcome};
use crate::capture::{is_cancellation, CaptureProvider, CapturedFile};
use crate::error::{Error, Result};
use crate::models::{
    ImageId, InspectionTemplate, LocalImage, RequestOp, TempVisualId, VisualField,
};
use crate::reactive::{ChangeBus, Table, TableChange};
use crate::stores::{FieldStore, ImageStore, Outbox, VISUALS_TABLE};
use crate::sync::SyncStatus;
use crate::timer::{Clock, Cooldown, Debouncer};
use crate::viewmodel::photos::PhotoList;

/// Cooldown after an optimistic local mutation, during which external
/// cache-invalidation echoes are ignored.
const OPTIMISTIC_COOLDOWN_MS: i64 = 2_000;

/// Pause after the last keystroke before a live answer edit is committed.
const ANSWER_DEBOUNCE_MS: u64 = 400;

/// One row of the category page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryItem {
    pub field: VisualField,
    pub photos: PhotoList,
    /// Photos were populated at least once; hidden items stay false until
    /// unhidden.
    pub photos_loaded: bool,
    pub expanded: bool,
    pub saving: bool,
    /// Quarantined duplicate from reconciliation; rendered separately and
    /// never merged into a template row.
    pub orphan: bool,
}

impl CategoryItem {
    pub(crate) fn from_field(field: VisualField) -> Self {
        Self {
            field,
            photos: PhotoList::default(),
            photos_loaded: false,
            expanded: false,
            saving: false,
            orphan: false,
        }
    }

    /// Quarantined row for a remote visual that cannot be merged into any
    /// template item.
    pub(crate) fn orphaned(field: VisualField) -> Self {
        Self {
            orphan: true,
            ..Self::from_field(field)
        }
    }

    /// Stable UI key: template id for seeded rows, visual id for orphans.
    #[must_use]
    pub fn key(&self) -> String {
        if self.orphan {
            format!(
                "orphan_{}",
                self.field
                    .visual_id
                    .as_ref()
                    .map_or("unknown", |id| id.as_str())
            )
        } else {
            self.field.template_id.to_string()
        }
    }
}

#[derive(Default)]
struct PageState {
    items: Vec<CategoryItem>,
    /// Image ids written by an in-flight capture batch; the image stream
    /// must not re-insert these while the batch runs.
    suppressed: HashSet<ImageId>,
}

/// View-model for one (service, category) page.
pub struct CategoryDetailViewModel {
    service_id: String,
    category: String,
    templates: Vec<InspectionTemplate>,
    fields: FieldStore,
    images: ImageStore,
    outbox: Outbox,
    bus: ChangeBus,
    state: Mutex<PageState>,
    cooldown: Cooldown,
    answer_debounce: Debouncer,
    load_in_progress: AtomicBool,
    pending_reload: AtomicBool,
    is_syncing: AtomicBool,
    /// Per-entity in-flight photo loads; concurrent callers for the same key
    /// await the same lookup.
    photo_loads: Mutex<HashMap<String, Arc<OnceCell<Vec<LocalImage>>>>>,
}

impl CategoryDetailViewModel {
    /// Build the view-model for one page.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service_id: impl Into<String>,
        category: impl Into<String>,
        templates: Vec<InspectionTemplate>,
        fields: FieldStore,
        images: ImageStore,
        outbox: Outbox,
        bus: ChangeBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            category: category.into(),
            templates,
            fields,
            images,
            outbox,
            bus,
            state: Mutex::new(PageState::default()),
            cooldown: Cooldown::new(clock),
            answer_debounce: Debouncer::new(Duration::from_millis(ANSWER_DEBOUNCE_MS)),
            load_in_progress: AtomicBool::new(false),
            pending_reload: AtomicBool::new(false),
            is_syncing: AtomicBool::new(false),
            photo_loads: Mutex::new(HashMap::new()),
        }
    }

    /// Enter the page: subscribe to image changes, seed missing fields from
    /// templates, then populate items and their photos.
    ///
    /// The returned receiver is subscribed before the first photo population
    /// pass; feed it to [`Self::apply_change`]. Subscribing afterwards would
    /// open a window where a concurrent write is neither in the snapshot nor
    /// in the stream.
    pub async fn enter(&self) -> Result<broadcast::Receiver<TableChange>> {
        let rx = self.bus.subscribe();
        self.fields
            .seed_from_templates(&self.service_id, &self.category, &self.templates)
            .await?;
        self.reload().await?;
        Ok(rx)
    }

    /// Snapshot of the current items.
    pub async fn items(&self) -> Vec<CategoryItem> {
        self.state.lock().await.items.clone()
    }

    /// Snapshot of one seeded item.
    pub async fn item(&self, template_id: i64) -> Option<CategoryItem> {
        self.state
            .lock()
            .await
            .items
            .iter()
            .find(|item| !item.orphan && item.field.template_id == template_id)
            .cloned()
    }

    /// Select or unselect an item.
    ///
    /// Selecting a never-synced item assigns a temp visual id and queues the
    /// remote create; unselecting hides the row instead of deleting it, so
    /// its photos survive re-selection. Unhiding an item whose photos were
    /// never loaded triggers an on-demand load.
    pub async fn toggle_selection(&self, template_id: i64, selected: bool) -> Result<()> {
        let field = self.require_field(template_id).await?;

        if selected {
            if field.current_id().is_none() {
                self.create_temp_visual(&field).await?;
            }
            let updated = self
                .fields
                .set_field(
                    &self.service_id,
                    &self.category,
                    template_id,
                    crate::db::FieldPatch {
                        is_selected: Some(true),
                        is_hidden: Some(false),
                        ..crate::db::FieldPatch::default()
                    },
                )
                .await?;

            // A server-confirmed visual that was hidden remotely has to be
            // un-hidden there as well.
            if let Some(visual_id) = &updated.visual_id {
                self.outbox
                    .enqueue(
                        RequestOp::Update,
                        VISUALS_TABLE,
                        json!({ "IsHidden": false, "IsSelected": true }),
                        Some(visual_id.as_str().to_string()),
                        None,
                    )
                    .await?;
            }

            let needs_photos = {
                let state = self.state.lock().await;
                state
                    .items
                    .iter()
                    .find(|item| !item.orphan && item.field.template_id == template_id)
                    .is_some_and(|item| !item.photos_loaded)
            };
            self.replace_item_field(updated.clone()).await;
            if needs_photos {
                self.populate_photos_for(&updated).await?;
            }
        } else {
            let updated = self
                .fields
                .set_field(
                    &self.service_id,
                    &self.category,
                    template_id,
                    crate::db::FieldPatch {
                        is_selected: Some(false),
                        is_hidden: Some(true),
                        ..crate::db::FieldPatch::default()
                    },
                )
                .await?;
            // An unselect of a server-confirmed visual must reach the server
            // too, or the next reconciliation resurrects the row. A
            // temp-only visual needs nothing: its pending create already
            // carries the whole local state.
            if let Some(visual_id) = &updated.visual_id {
                self.outbox
                    .enqueue(
                        RequestOp::Update,
                        VISUALS_TABLE,
                        json!({ "IsHidden": true, "IsSelected": false }),
                        Some(visual_id.as_str().to_string()),
                        None,
                    )
                    .await?;
            }
            self.replace_item_field(updated).await;
        }

        self.cooldown.arm(OPTIMISTIC_COOLDOWN_MS);
        Ok(())
    }

    /// Write an answer change through to the store and queue the remote
    /// update. An answer that becomes empty (with no free-text value) hides
    /// the row rather than deleting it.
    pub async fn set_answer(&self, template_id: i64, answer: &str, other_value: &str) -> Result<()> {
        let empty = answer.trim().is_empty() && other_value.trim().is_empty();
        let updated = self
            .fields
            .set_field(
                &self.service_id,
                &self.category,
                template_id,
                crate::db::FieldPatch {
                    answer: Some(answer.to_string()),
                    other_value: Some(other_value.to_string()),
                    is_hidden: Some(empty),
                    is_selected: Some(!empty),
                    ..crate::db::FieldPatch::default()
                },
            )
            .await?;
        self.replace_item_field(updated.clone()).await;

        if let Some(entity_id) = updated.current_id() {
            self.outbox
                .enqueue(
                    RequestOp::Update,
                    VISUALS_TABLE,
                    json!({
                        "Answer": updated.answer,
                        "OtherValue": updated.other_value,
                        "IsHidden": updated.is_hidden,
                        "IsSelected": updated.is_selected,
                    }),
                    Some(entity_id),
                    None,
                )
                .await?;
        }
        self.cooldown.arm(OPTIMISTIC_COOLDOWN_MS);
        Ok(())
    }

    /// Live answer typing. Each keystroke supersedes the previous one; the
    /// write-through in [`Self::set_answer`] runs once after input pauses,
    /// so a burst of edits queues a single remote update with the final
    /// value.
    pub fn answer_input(self: &Arc<Self>, template_id: i64, answer: &str, other_value: &str) {
        let vm = Arc::clone(self);
        let answer = answer.to_string();
        let other_value = other_value.to_string();
        self.answer_debounce.fire(async move {
            if let Err(error) = vm.set_answer(template_id, &answer, &other_value).await {
                tracing::warn!(template_id, %error, "Debounced answer save failed");
            }
        });
    }

    /// Take a single camera photo for an item. Cancellation in the provider
    /// is a silent no-op.
    pub async fn capture_from_camera(
        &self,
        template_id: i64,
        provider: &dyn CaptureProvider,
    ) -> Result<usize> {
        match provider.get_photo().await {
            Ok(file) => self.capture_photos(template_id, &[file]).await,
            Err(error) if is_cancellation(&error.to_string()) => Ok(0),
            Err(error) => Err(error),
        }
    }

    /// Pick gallery photos for an item. Cancellation in the provider is a
    /// silent no-op.
    pub async fn capture_from_gallery(
        &self,
        template_id: i64,
        provider: &dyn CaptureProvider,
    ) -> Result<usize> {
        match provider.pick_images().await {
            Ok(files) => self.capture_photos(template_id, &files).await,
            Err(error) if is_cancellation(&error.to_string()) => Ok(0),
            Err(error) => Err(error),
        }
    }

    /// Store a batch of captured photos for an item.
    ///
    /// Each photo renders immediately from its local blob. The image stream
    /// is suppressed for exactly this batch's ids until the batch finishes
    /// or errors, so the stream cannot insert the same photos a second time;
    /// other items keep updating live. A broken file is skipped with a
    /// diagnostic without aborting the rest of the batch.
    pub async fn capture_photos(
        &self,
        template_id: i64,
        files: &[CapturedFile],
    ) -> Result<usize> {
        let field = self.require_field(template_id).await?;
        let field = if field.current_id().is_none() {
            self.create_temp_visual(&field).await?
        } else {
            field
        };
        let entity_id = field
            .current_id()
            .ok_or_else(|| Error::InvalidInput("Item has no entity id".to_string()))?;

        let mut stored = 0usize;
        let mut batch_error = None;
        for file in files {
            let image = match self
                .images
                .capture_image(file, "visual", &entity_id, &self.service_id, "")
                .await
            {
                Ok(image) => image,
                Err(Error::Capture(message)) => {
                    tracing::warn!(file = %file.file_name, %message, "Skipped broken capture");
                    continue;
                }
                Err(error) => {
                    batch_error = Some(error);
                    break;
                }
            };

            let display_url = self.images.display_url(&image).await;
            let mut state = self.state.lock().await;
            state.suppressed.insert(image.image_id.clone());
            if let Some(item) = state
                .items
                .iter_mut()
                .find(|item| !item.orphan && item.field.template_id == template_id)
            {
                item.photos.upsert(&image, display_url);
                item.photos_loaded = true;
                item.expanded = true;
            }
            stored += 1;
        }

        // Batch over, success or not; the stream takes over for these ids.
        self.state.lock().await.suppressed.clear();
        if let Some(error) = batch_error {
            return Err(error);
        }
        self.bump_photo_count(template_id).await?;
        Ok(stored)
    }

    /// Original (never-annotated) bytes for the annotation editor, so
    /// repeated edits do not compound earlier renderings.
    pub async fn annotation_base(&self, image_id: &ImageId) -> Result<Option<Vec<u8>>> {
        let Some(image) = self.images.get(image_id).await? else {
            return Ok(None);
        };
        self.images.blob_bytes(&image).await
    }

    /// Stored drawing overlay for an image, decompressed for the editor.
    pub async fn annotation_overlay(&self, image_id: &ImageId) -> Result<Option<serde_json::Value>> {
        let Some(image) = self.images.get(image_id).await? else {
            return Ok(None);
        };
        image.drawings.as_deref().map(decompress_drawings).transpose()
    }

    /// Persist whatever the annotation editor returned; a cancel changes
    /// nothing. Returns whether a save was applied. The edited render is not
    /// stored; display re-applies the overlay from the drawing data on top
    /// of the original bytes.
    pub async fn apply_annotation_outcome(
        &self,
        image_id: &ImageId,
        outcome: AnnotationOutcome,
    ) -> Result<bool> {
        match outcome {
            AnnotationOutcome::Saved {
                blob: _,
                annotation_data,
                caption,
            } => {
                self.save_annotation(image_id, &annotation_data, &caption)
                    .await?;
                Ok(true)
            }
            AnnotationOutcome::Cancelled => Ok(false),
        }
    }

    /// Persist a saved annotation and caption, then refresh the entry.
    pub async fn save_annotation(
        &self,
        image_id: &ImageId,
        annotation_data: &serde_json::Value,
        caption: &str,
    ) -> Result<()> {
        self.images
            .save_annotation(image_id, annotation_data, caption)
            .await?;
        self.refresh_photo(image_id).await?;
        self.cooldown.arm(OPTIMISTIC_COOLDOWN_MS);
        Ok(())
    }

    /// Edit a photo caption.
    pub async fn set_caption(&self, image_id: &ImageId, caption: &str) -> Result<()> {
        self.images.update_caption(image_id, caption).await?;
        self.refresh_photo(image_id).await?;
        self.cooldown.arm(OPTIMISTIC_COOLDOWN_MS);
        Ok(())
    }

    /// Delete a photo from its item.
    pub async fn delete_photo(&self, template_id: i64, image_id: &ImageId) -> Result<()> {
        self.images.delete_image(image_id).await?;
        {
            let mut state = self.state.lock().await;
            if let Some(item) = state
                .items
                .iter_mut()
                .find(|item| !item.orphan && item.field.template_id == template_id)
            {
                item.photos.remove(image_id);
            }
        }
        self.bump_photo_count(template_id).await?;
        Ok(())
    }

    /// Apply one change-bus event to the page.
    pub async fn apply_change(&self, change: &TableChange) -> Result<()> {
        if !change.touches_service(&self.service_id) {
            return Ok(());
        }
        match change.table {
            Table::Images => self.apply_image_change(change).await,
            Table::Fields => self.apply_field_change().await,
            Table::Identity | Table::Outbox => Ok(()),
        }
    }

    /// React to the sync status stream. A reload requested mid-sync is
    /// deferred until syncing ends, so it cannot race in-flight re-homes and
    /// drop photos.
    pub async fn on_sync_status(&self, status: SyncStatus) -> Result<()> {
        self.is_syncing.store(status.is_syncing, Ordering::SeqCst);
        if !status.is_syncing && self.pending_reload.swap(false, Ordering::SeqCst) {
            self.reload().await?;
        }
        Ok(())
    }

    /// React to a cache invalidation signal.
    ///
    /// Ignored inside the optimistic-mutation cooldown (a server echo must
    /// not clobber a just-made local change); deferred while syncing.
    pub async fn on_cache_invalidated(&self, service_id: Option<&str>) -> Result<()> {
        if let Some(service_id) = service_id {
            if service_id != self.service_id {
                return Ok(());
            }
        }
        if self.cooldown.is_active() {
            tracing::debug!("Cache invalidation ignored during cooldown");
            return Ok(());
        }
        if self.is_syncing.load(Ordering::SeqCst) {
            self.pending_reload.store(true, Ordering::SeqCst);
            return Ok(());
        }
        self.reload().await
    }

    /// Merge server-confirmed visuals into the page: durable store merge
    /// first, then the in-memory item reconciliation.
    pub async fn reconcile_remote(
        &self,
        visuals: &[crate::remote::RemoteVisual],
    ) -> Result<crate::viewmodel::ReconcileReport> {
        self.fields
            .merge_existing_visuals(&self.service_id, &self.category, visuals)
            .await?;
        let mut state = self.state.lock().await;
        Ok(crate::viewmodel::reconcile::reconcile_items(
            &mut state.items,
            visuals,
            &self.service_id,
        ))
    }

    /// Full rebuild of the page from the stores. A reload while one is
    /// already running is a no-op; overlapping passes could duplicate or
    /// drop photos.
    pub async fn reload(&self) -> Result<()> {
        if self.load_in_progress.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.reload_inner().await;
        self.load_in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn reload_inner(&self) -> Result<()> {
        let fields = self
            .fields
            .list_category(&self.service_id, &self.category)
            .await?;

        let previous = std::mem::take(&mut self.state.lock().await.items);
        let mut items = Vec::with_capacity(fields.len());
        for field in fields {
            let mut item = CategoryItem::from_field(field);
            if let Some(old) = previous.iter().find(|old| old.key() == item.key()) {
                // Keep rendered photos; the population pass only refreshes.
                item.photos = old.photos.clone();
                item.photos_loaded = old.photos_loaded;
                item.expanded = old.expanded;
            }
            items.push(item);
        }
        items.extend(previous.into_iter().filter(|item| item.orphan));
        self.state.lock().await.items = items;

        let visible: Vec<VisualField> = self
            .state
            .lock()
            .await
            .items
            .iter()
            .filter(|item| !item.field.is_hidden)
            .map(|item| item.field.clone())
            .collect();
        for field in visible {
            self.populate_photos_for(&field).await?;
        }
        Ok(())
    }

    /// Photo population pass for one item: union lookup under every id form,
    /// then a non-regressive refresh of what is already rendered.
    async fn populate_photos_for(&self, field: &VisualField) -> Result<()> {
        let Some(entity_id) = field.current_id() else {
            return Ok(());
        };
        // Identity miss means "no photos yet", never an error.
        let images = self.load_photos_deduped(&entity_id).await?;

        let mut resolved = Vec::with_capacity(images.len());
        for image in images {
            let url = self.images.display_url(&image).await;
            resolved.push((image, url));
        }

        let mut state = self.state.lock().await;
        let suppressed = state.suppressed.clone();
        if let Some(item) = state
            .items
            .iter_mut()
            .find(|item| item.field.template_id == field.template_id && !item.orphan)
        {
            for (image, url) in resolved {
                if suppressed.contains(&image.image_id) {
                    continue;
                }
                item.photos.upsert(&image, url);
            }
            item.photos_loaded = true;
        }
        Ok(())
    }

    /// Deduplicated photo lookup: concurrent callers for the same entity id
    /// await the same in-flight query.
    async fn load_photos_deduped(&self, entity_id: &str) -> Result<Vec<LocalImage>> {
        let cell = {
            let mut loads = self.photo_loads.lock().await;
            loads
                .entry(entity_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        let result = cell
            .get_or_try_init(|| self.images.images_for_entity(entity_id))
            .await
            .map(Clone::clone);
        self.photo_loads.lock().await.remove(entity_id);
        result
    }

    async fn apply_image_change(&self, change: &TableChange) -> Result<()> {
        let suppressed: HashSet<String> = {
            let state = self.state.lock().await;
            state
                .suppressed
                .iter()
                .map(|id| id.as_str().to_string())
                .collect()
        };
        if !change.keys.is_empty() && change.keys.iter().all(|key| suppressed.contains(key)) {
            return Ok(());
        }

        let fields: Vec<VisualField> = {
            let state = self.state.lock().await;
            state
                .items
                .iter()
                .filter(|item| item.photos_loaded && !item.field.is_hidden)
                .map(|item| item.field.clone())
                .collect()
        };
        for field in fields {
            self.populate_photos_for(&field).await?;
        }
        Ok(())
    }

    async fn apply_field_change(&self) -> Result<()> {
        let fields = self
            .fields
            .list_category(&self.service_id, &self.category)
            .await?;
        let mut state = self.state.lock().await;
        for field in fields {
            match state
                .items
                .iter_mut()
                .find(|item| !item.orphan && item.field.template_id == field.template_id)
            {
                // Change-only writes avoid needless flicker downstream.
                Some(item) if item.field != field => item.field = field,
                Some(_) => {}
                None => state.items.push(CategoryItem::from_field(field)),
            }
        }
        Ok(())
    }

    async fn refresh_photo(&self, image_id: &ImageId) -> Result<()> {
        let Some(image) = self.images.get(image_id).await? else {
            return Ok(());
        };
        let url = self.images.display_url(&image).await;
        let mut state = self.state.lock().await;
        for item in &mut state.items {
            if item.photos.get(image_id).is_some() {
                item.photos.upsert(&image, url);
                break;
            }
        }
        Ok(())
    }

    /// Assign a temp id to a never-synced field and queue the remote create.
    async fn create_temp_visual(&self, field: &VisualField) -> Result<VisualField> {
        let temp = TempVisualId::new();
        let updated = self
            .fields
            .set_field(
                &self.service_id,
                &self.category,
                field.template_id,
                crate::db::FieldPatch {
                    temp_visual_id: Some(Some(temp.clone())),
                    ..crate::db::FieldPatch::default()
                },
            )
            .await?;

        // Idempotent by temp id: a second create for the same item is
        // dropped by the outbox, so restart-then-reselect cannot duplicate
        // the visual remotely.
        self.outbox
            .enqueue(
                RequestOp::Create,
                VISUALS_TABLE,
                json!({
                    "ServiceID": self.service_id,
                    "Category": self.category,
                    "TemplateID": field.template_id,
                    "Name": field.template_name,
                    "Kind": field.kind.as_str(),
                }),
                Some(temp.as_str().to_string()),
                None,
            )
            .await?;
        Ok(updated)
    }

    async fn bump_photo_count(&self, template_id: i64) -> Result<()> {
        let field = self.require_field(template_id).await?;
        let count = match field.current_id() {
            Some(entity_id) => self.images.count_for_entity(&entity_id).await?,
            None => 0,
        };
        let updated = self
            .fields
            .set_field(
                &self.service_id,
                &self.category,
                template_id,
                crate::db::FieldPatch {
                    photo_count: Some(count),
                    ..crate::db::FieldPatch::default()
                },
            )
            .await?;
        self.replace_item_field(updated).await;
        Ok(())
    }

    async fn replace_item_field(&self, field: VisualField) {
        let mut state = self.state.lock().await;
        match state
            .items
            .iter_mut()
            .find(|item| !item.orphan && item.field.template_id == field.template_id)
        {
            Some(item) => item.field = field,
            None => state.items.push(CategoryItem::from_field(field)),
        }
    }

    async fn require_field(&self, template_id: i64) -> Result<VisualField> {
        self.fields
            .get(&self.service_id, &self.category, template_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "No field for template {template_id} in {}/{}",
                    self.service_id, self.category
                ))
            })
    }
}
