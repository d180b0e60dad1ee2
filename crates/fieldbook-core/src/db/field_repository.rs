//! Visual field repository implementation

use crate::error::{Error, Result};
use crate::models::{InspectionTemplate, TempVisualId, VisualField, VisualId};
use rusqlite::{params, Connection};

/// Partial update applied to a stored field.
///
/// `visual_id` and `temp_visual_id` are double-optional: the outer level means
/// "change this column", the inner level is the new nullable value.
#[derive(Debug, Clone, Default)]
pub struct FieldPatch {
    pub is_selected: Option<bool>,
    pub answer: Option<String>,
    pub other_value: Option<String>,
    pub is_hidden: Option<bool>,
    pub photo_count: Option<i64>,
    pub visual_id: Option<Option<VisualId>>,
    pub temp_visual_id: Option<Option<TempVisualId>>,
}

impl FieldPatch {
    /// Apply this patch to a field in memory, bumping `updated_at`.
    pub fn apply(&self, field: &mut VisualField) {
        if let Some(is_selected) = self.is_selected {
            field.is_selected = is_selected;
        }
        if let Some(answer) = &self.answer {
            field.answer.clone_from(answer);
        }
        if let Some(other_value) = &self.other_value {
            field.other_value.clone_from(other_value);
        }
        if let Some(is_hidden) = self.is_hidden {
            field.is_hidden = is_hidden;
        }
        if let Some(photo_count) = self.photo_count {
            field.photo_count = photo_count;
        }
        if let Some(visual_id) = &self.visual_id {
            field.visual_id.clone_from(visual_id);
        }
        if let Some(temp_visual_id) = &self.temp_visual_id {
            field.temp_visual_id.clone_from(temp_visual_id);
        }
        field.updated_at = crate::util::unix_millis_now();
    }
}

/// Trait for visual field storage operations
pub trait FieldRepository {
    /// Insert or replace a field row.
    fn upsert(&self, field: &VisualField) -> Result<()>;

    /// Get one field by its composite key.
    fn get(&self, service_id: &str, category: &str, template_id: i64)
        -> Result<Option<VisualField>>;

    /// List all fields for a category, hidden ones included.
    fn list_category(&self, service_id: &str, category: &str) -> Result<Vec<VisualField>>;

    /// List all fields for a service.
    fn list_service(&self, service_id: &str) -> Result<Vec<VisualField>>;

    /// Apply a partial update; errors if the field does not exist.
    fn patch(
        &self,
        service_id: &str,
        category: &str,
        template_id: i64,
        patch: &FieldPatch,
    ) -> Result<VisualField>;

    /// Seed fields from templates. Idempotent: existing (service, category,
    /// template) rows are left untouched. Returns how many rows were created.
    fn seed(
        &self,
        service_id: &str,
        category: &str,
        templates: &[InspectionTemplate],
    ) -> Result<usize>;

    /// Rewrite a temp visual id to its server-assigned id. Returns the keys
    /// (as `template_id` strings) of the rows that changed.
    fn resolve_temp(&self, temp_id: &str, real_id: &str) -> Result<Vec<VisualField>>;

    /// Find the field currently carrying the given visual id, temp or real.
    fn find_by_entity_id(&self, entity_id: &str) -> Result<Option<VisualField>>;
}

/// `SQLite` implementation of `FieldRepository`
pub struct SqliteFieldRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteFieldRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_field(row: &rusqlite::Row<'_>) -> rusqlite::Result<VisualField> {
        let visual_id: Option<String> = row.get(3)?;
        let temp_visual_id: Option<String> = row.get(4)?;
        let kind: String = row.get(8)?;
        let dropdown_options: String = row.get(11)?;

        Ok(VisualField {
            service_id: row.get(0)?,
            category: row.get(1)?,
            template_id: row.get(2)?,
            visual_id: visual_id.and_then(|id| VisualId::new(id).ok()),
            temp_visual_id: temp_visual_id.and_then(|id| id.parse().ok()),
            is_selected: row.get::<_, i32>(5)? != 0,
            answer: row.get(6)?,
            other_value: row.get(7)?,
            kind: kind.parse().unwrap_or(crate::models::VisualKind::Comment),
            template_name: row.get(9)?,
            template_text: row.get(10)?,
            dropdown_options: serde_json::from_str(&dropdown_options).unwrap_or_default(),
            photo_count: row.get(12)?,
            is_hidden: row.get::<_, i32>(13)? != 0,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }
}

const FIELD_COLUMNS: &str = "service_id, category, template_id, visual_id, temp_visual_id, \
     is_selected, answer, other_value, kind, template_name, template_text, \
     dropdown_options, photo_count, is_hidden, created_at, updated_at";

impl FieldRepository for SqliteFieldRepository<'_> {
    fn upsert(&self, field: &VisualField) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO fields ({FIELD_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                field.service_id,
                field.category,
                field.template_id,
                field.visual_id.as_ref().map(VisualId::as_str),
                field.temp_visual_id.as_ref().map(TempVisualId::as_str),
                i32::from(field.is_selected),
                field.answer,
                field.other_value,
                field.kind.as_str(),
                field.template_name,
                field.template_text,
                serde_json::to_string(&field.dropdown_options)?,
                field.photo_count,
                i32::from(field.is_hidden),
                field.created_at,
                field.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get(
        &self,
        service_id: &str,
        category: &str,
        template_id: i64,
    ) -> Result<Option<VisualField>> {
        let result = self.conn.query_row(
            &format!(
                "SELECT {FIELD_COLUMNS} FROM fields
                 WHERE service_id = ? AND category = ? AND template_id = ?"
            ),
            params![service_id, category, template_id],
            Self::parse_field,
        );

        match result {
            Ok(field) => Ok(Some(field)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_category(&self, service_id: &str, category: &str) -> Result<Vec<VisualField>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FIELD_COLUMNS} FROM fields
             WHERE service_id = ? AND category = ?
             ORDER BY template_id ASC"
        ))?;
        let fields = stmt
            .query_map(params![service_id, category], Self::parse_field)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(fields)
    }

    fn list_service(&self, service_id: &str) -> Result<Vec<VisualField>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FIELD_COLUMNS} FROM fields
             WHERE service_id = ?
             ORDER BY category ASC, template_id ASC"
        ))?;
        let fields = stmt
            .query_map(params![service_id], Self::parse_field)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(fields)
    }

    fn patch(
        &self,
        service_id: &str,
        category: &str,
        template_id: i64,
        patch: &FieldPatch,
    ) -> Result<VisualField> {
        let mut field = self.get(service_id, category, template_id)?.ok_or_else(|| {
            Error::NotFound(format!(
                "Field {service_id}/{category}/{template_id} does not exist"
            ))
        })?;
        patch.apply(&mut field);
        self.upsert(&field)?;
        Ok(field)
    }

    fn seed(
        &self,
        service_id: &str,
        category: &str,
        templates: &[InspectionTemplate],
    ) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut created = 0;
        for template in templates {
            let field = VisualField::seeded(
                service_id,
                category,
                template.template_id,
                template.kind,
                template.name.clone(),
                template.text.clone(),
                template.dropdown_options.clone(),
            );
            let inserted = tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO fields ({FIELD_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    field.service_id,
                    field.category,
                    field.template_id,
                    Option::<String>::None,
                    Option::<String>::None,
                    0,
                    field.answer,
                    field.other_value,
                    field.kind.as_str(),
                    field.template_name,
                    field.template_text,
                    serde_json::to_string(&field.dropdown_options)?,
                    0,
                    0,
                    field.created_at,
                    field.updated_at,
                ],
            )?;
            created += inserted;
        }
        tx.commit()?;
        Ok(created)
    }

    fn resolve_temp(&self, temp_id: &str, real_id: &str) -> Result<Vec<VisualField>> {
        let now = crate::util::unix_millis_now();
        self.conn.execute(
            "UPDATE fields SET visual_id = ?, temp_visual_id = NULL, updated_at = ?
             WHERE temp_visual_id = ?",
            params![real_id, now, temp_id],
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FIELD_COLUMNS} FROM fields WHERE visual_id = ?"
        ))?;
        let fields = stmt
            .query_map(params![real_id], Self::parse_field)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(fields)
    }

    fn find_by_entity_id(&self, entity_id: &str) -> Result<Option<VisualField>> {
        let result = self.conn.query_row(
            &format!(
                "SELECT {FIELD_COLUMNS} FROM fields
                 WHERE visual_id = ? OR temp_visual_id = ?"
            ),
            params![entity_id, entity_id],
            Self::parse_field,
        );

        match result {
            Ok(field) => Ok(Some(field)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::VisualKind;

    fn templates() -> Vec<InspectionTemplate> {
        vec![
            InspectionTemplate::new(
                1,
                "Foundation Cracks",
                "Visible cracking observed",
                VisualKind::Deficiency,
                vec!["Minor".to_string(), "Severe".to_string()],
            ),
            InspectionTemplate::new(2, "Grading", "", VisualKind::Comment, vec![]),
        ]
    }

    #[test]
    fn seed_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteFieldRepository::new(db.connection());

        let created = repo.seed("svc", "Foundations", &templates()).unwrap();
        assert_eq!(created, 2);
        let created = repo.seed("svc", "Foundations", &templates()).unwrap();
        assert_eq!(created, 0);

        let fields = repo.list_category("svc", "Foundations").unwrap();
        assert_eq!(fields.len(), 2);
        assert!(fields.iter().all(|f| !f.is_selected && !f.is_hidden));
    }

    #[test]
    fn seed_preserves_existing_state() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteFieldRepository::new(db.connection());
        repo.seed("svc", "Foundations", &templates()).unwrap();

        repo.patch(
            "svc",
            "Foundations",
            1,
            &FieldPatch {
                is_selected: Some(true),
                answer: Some("Severe".to_string()),
                ..FieldPatch::default()
            },
        )
        .unwrap();

        repo.seed("svc", "Foundations", &templates()).unwrap();
        let field = repo.get("svc", "Foundations", 1).unwrap().unwrap();
        assert!(field.is_selected);
        assert_eq!(field.answer, "Severe");
    }

    #[test]
    fn patch_round_trips_ids() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteFieldRepository::new(db.connection());
        repo.seed("svc", "Foundations", &templates()).unwrap();

        let temp = TempVisualId::new();
        repo.patch(
            "svc",
            "Foundations",
            1,
            &FieldPatch {
                temp_visual_id: Some(Some(temp.clone())),
                is_selected: Some(true),
                ..FieldPatch::default()
            },
        )
        .unwrap();

        let field = repo.find_by_entity_id(temp.as_str()).unwrap().unwrap();
        assert_eq!(field.template_id, 1);
        assert_eq!(field.current_id(), Some(temp.as_str().to_string()));
    }

    #[test]
    fn resolve_temp_clears_temp_id() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteFieldRepository::new(db.connection());
        repo.seed("svc", "Foundations", &templates()).unwrap();

        let temp = TempVisualId::new();
        repo.patch(
            "svc",
            "Foundations",
            1,
            &FieldPatch {
                temp_visual_id: Some(Some(temp.clone())),
                ..FieldPatch::default()
            },
        )
        .unwrap();

        let changed = repo.resolve_temp(temp.as_str(), "VIS-42").unwrap();
        assert_eq!(changed.len(), 1);
        let field = &changed[0];
        assert_eq!(field.visual_id.as_ref().unwrap().as_str(), "VIS-42");
        assert!(field.temp_visual_id.is_none());
        assert_eq!(field.current_id(), Some("VIS-42".to_string()));
    }

    #[test]
    fn patch_missing_field_errors() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteFieldRepository::new(db.connection());
        let result = repo.patch("svc", "Roof", 99, &FieldPatch::default());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
