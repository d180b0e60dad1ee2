//! Reactive local store of visual fields.

use tokio::sync::broadcast::error::RecvError;

use crate::db::{Db, FieldPatch, FieldRepository, SqliteFieldRepository};
use crate::error::Result;
use crate::models::{InspectionTemplate, VisualField};
use crate::reactive::{ChangeBus, Table};
use crate::remote::RemoteVisual;

/// Remote table for visual records.
pub const VISUALS_TABLE: &str = "visuals";

/// Async handle over the fields table with change notification.
#[derive(Clone)]
pub struct FieldStore {
    db: Db,
    bus: ChangeBus,
}

/// Live subscription to one category's fields.
///
/// Dropping and re-creating a watch loses nothing: state lives in the
/// database, the watch only signals when to re-query.
pub struct FieldWatch {
    store: FieldStore,
    service_id: String,
    category: String,
    rx: tokio::sync::broadcast::Receiver<crate::reactive::TableChange>,
}

impl FieldWatch {
    /// Current rows, without waiting for a change.
    pub async fn snapshot(&self) -> Result<Vec<VisualField>> {
        self.store
            .list_category(&self.service_id, &self.category)
            .await
    }

    /// Wait for the next relevant change, then return the fresh rows.
    /// A lagged subscription degrades to an immediate re-query.
    pub async fn changed(&mut self) -> Result<Vec<VisualField>> {
        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    if change.table == Table::Fields && change.touches_service(&self.service_id) {
                        return self.snapshot().await;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "Field watch lagged; re-querying");
                    return self.snapshot().await;
                }
                Err(RecvError::Closed) => {
                    // Bus gone; the snapshot is still the source of truth.
                    return self.snapshot().await;
                }
            }
        }
    }
}

impl FieldStore {
    /// Create a handle.
    #[must_use]
    pub fn new(db: Db, bus: ChangeBus) -> Self {
        Self { db, bus }
    }

    /// Subscribe to a category's fields.
    #[must_use]
    pub fn watch_category(&self, service_id: &str, category: &str) -> FieldWatch {
        FieldWatch {
            store: self.clone(),
            service_id: service_id.to_string(),
            category: category.to_string(),
            rx: self.bus.subscribe(),
        }
    }

    /// All fields for a category, hidden included, ordered by template id.
    pub async fn list_category(&self, service_id: &str, category: &str) -> Result<Vec<VisualField>> {
        self.db
            .with({
                let service_id = service_id.to_string();
                let category = category.to_string();
                move |db| {
                    SqliteFieldRepository::new(db.connection())
                        .list_category(&service_id, &category)
                }
            })
            .await
    }

    /// One field by composite key.
    pub async fn get(
        &self,
        service_id: &str,
        category: &str,
        template_id: i64,
    ) -> Result<Option<VisualField>> {
        self.db
            .with({
                let service_id = service_id.to_string();
                let category = category.to_string();
                move |db| {
                    SqliteFieldRepository::new(db.connection()).get(
                        &service_id,
                        &category,
                        template_id,
                    )
                }
            })
            .await
    }

    /// The field currently carrying the given visual id, temp or real.
    pub async fn find_by_entity_id(&self, entity_id: &str) -> Result<Option<VisualField>> {
        self.db
            .with({
                let entity_id = entity_id.to_string();
                move |db| SqliteFieldRepository::new(db.connection()).find_by_entity_id(&entity_id)
            })
            .await
    }

    /// Apply a partial update and publish the change. The returned future
    /// completes only after the write is durable, so callers get strict
    /// write-before-read ordering against the watch stream.
    pub async fn set_field(
        &self,
        service_id: &str,
        category: &str,
        template_id: i64,
        patch: FieldPatch,
    ) -> Result<VisualField> {
        let field = self
            .db
            .with({
                let service_id = service_id.to_string();
                let category = category.to_string();
                move |db| {
                    SqliteFieldRepository::new(db.connection()).patch(
                        &service_id,
                        &category,
                        template_id,
                        &patch,
                    )
                }
            })
            .await?;
        self.bus
            .publish_keys(Table::Fields, service_id, vec![template_id.to_string()]);
        Ok(field)
    }

    /// Seed fields from templates. Idempotent; publishes only when rows were
    /// actually created. Returns the number of new rows.
    pub async fn seed_from_templates(
        &self,
        service_id: &str,
        category: &str,
        templates: &[InspectionTemplate],
    ) -> Result<usize> {
        let created = self
            .db
            .with({
                let service_id = service_id.to_string();
                let category = category.to_string();
                let templates = templates.to_vec();
                move |db| {
                    SqliteFieldRepository::new(db.connection()).seed(
                        &service_id,
                        &category,
                        &templates,
                    )
                }
            })
            .await?;
        if created > 0 {
            tracing::info!(service_id, category, created, "Seeded fields from templates");
            self.bus.publish_keys(Table::Fields, service_id, Vec::new());
        }
        Ok(created)
    }

    /// Reconcile server-confirmed visuals into local fields.
    ///
    /// Match primarily by template id; fall back to (name, kind) within the
    /// category for legacy records without one. The fallback is ambiguous
    /// when two templates share a name, so the first match wins with a
    /// warning.
    pub async fn merge_existing_visuals(
        &self,
        service_id: &str,
        category: &str,
        visuals: &[RemoteVisual],
    ) -> Result<usize> {
        let fields = self.list_category(service_id, category).await?;
        let mut merged = 0;

        for visual in visuals {
            if !visual.category.eq_ignore_ascii_case(category) {
                continue;
            }
            let matched = match_field(&fields, visual);
            let Some(field) = matched else {
                tracing::debug!(
                    visual_id = %visual.visual_id,
                    name = %visual.name,
                    "Server visual matches no local field; skipping"
                );
                continue;
            };

            let visual_id = crate::models::VisualId::new(visual.visual_id.clone())?;
            // A locally hidden row is an unselect the server may not know
            // about yet; the merge must never resurrect it. Otherwise server
            // visibility wins.
            let (selected, hidden) = if field.is_hidden {
                (field.is_selected, true)
            } else {
                (!visual.is_hidden, visual.is_hidden)
            };
            // Only write when something actually changed, to avoid needless
            // downstream re-renders.
            let unchanged = field.visual_id.as_ref() == Some(&visual_id)
                && field.is_selected == selected
                && field.is_hidden == hidden
                && field.answer == visual.answer
                && field.other_value == visual.other_value;
            if unchanged {
                continue;
            }

            self.set_field(
                service_id,
                category,
                field.template_id,
                FieldPatch {
                    visual_id: Some(Some(visual_id)),
                    temp_visual_id: Some(None),
                    is_selected: Some(selected),
                    is_hidden: Some(hidden),
                    answer: Some(visual.answer.clone()),
                    other_value: Some(visual.other_value.clone()),
                    ..FieldPatch::default()
                },
            )
            .await?;
            merged += 1;
        }
        Ok(merged)
    }

    /// Rewrite a temp visual id to its server-assigned id and publish the
    /// changed rows.
    pub async fn resolve_temp(&self, temp_id: &str, real_id: &str) -> Result<Vec<VisualField>> {
        let changed = self
            .db
            .with({
                let temp_id = temp_id.to_string();
                let real_id = real_id.to_string();
                move |db| {
                    SqliteFieldRepository::new(db.connection()).resolve_temp(&temp_id, &real_id)
                }
            })
            .await?;
        for field in &changed {
            self.bus.publish_keys(
                Table::Fields,
                &field.service_id,
                vec![field.template_id.to_string()],
            );
        }
        Ok(changed)
    }
}

/// Template-id primary match with (name, kind) fallback for legacy rows.
fn match_field<'a>(fields: &'a [VisualField], visual: &RemoteVisual) -> Option<&'a VisualField> {
    if let Some(template_id) = visual.template_id {
        if let Some(field) = fields.iter().find(|f| f.template_id == template_id) {
            return Some(field);
        }
    }

    let mut candidates = fields.iter().filter(|f| {
        f.template_name.eq_ignore_ascii_case(&visual.name)
            && f.kind.as_str().eq_ignore_ascii_case(&visual.kind)
    });
    let first = candidates.next();
    if first.is_some() && candidates.next().is_some() {
        tracing::warn!(
            name = %visual.name,
            kind = %visual.kind,
            "Ambiguous fallback match; taking first candidate"
        );
    }
    first
}
