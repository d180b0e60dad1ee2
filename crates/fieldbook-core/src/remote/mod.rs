//! Remote data API boundary.
//!
//! The backend is treated as an opaque REST-like record store. It is not
//! assumed idempotent; at-least-once and idempotent-by-temp-id semantics are
//! layered on top by the outbox and synchronizer.

mod http;
mod memory;

use async_trait::async_trait;

use crate::error::Result;

pub use http::HttpRemote;
pub use memory::MemoryRemote;

/// Opaque remote record store.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create a record, returning the server-assigned id.
    async fn create(&self, table: &str, payload: &serde_json::Value) -> Result<String>;

    /// Update a record by id.
    async fn update(&self, table: &str, record_id: &str, payload: &serde_json::Value)
        -> Result<()>;

    /// Delete a record by id.
    async fn delete(&self, table: &str, record_id: &str) -> Result<()>;

    /// Get a short-lived signed URL for a stored file key.
    async fn signed_file_url(&self, key: &str) -> Result<String>;

    /// List records matching a filter.
    async fn list(&self, table: &str, filter: &serde_json::Value)
        -> Result<Vec<serde_json::Value>>;
}

/// Server-confirmed visual record, normalized at the boundary.
///
/// Remote rows arrive as loosely typed JSON; this adapter keeps untyped blobs
/// out of the core. Legacy rows can miss the template id entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVisual {
    pub visual_id: String,
    pub category: String,
    pub template_id: Option<i64>,
    pub name: String,
    pub kind: String,
    pub answer: String,
    pub other_value: String,
    /// Soft-hidden on the server (unselected without losing photos).
    pub is_hidden: bool,
}

impl RemoteVisual {
    /// Normalize a raw record. Returns `None` when the row lacks the fields
    /// required to identify it at all (no id or no category).
    #[must_use]
    pub fn from_record(record: &serde_json::Value) -> Option<Self> {
        let visual_id = string_field(record, &["VisualID", "visual_id", "id"])?;
        let category = string_field(record, &["Category", "category"])?;
        Some(Self {
            visual_id,
            category,
            template_id: int_field(record, &["TemplateID", "template_id"]),
            name: string_field(record, &["Name", "name"]).unwrap_or_default(),
            kind: string_field(record, &["Kind", "Type", "kind"]).unwrap_or_default(),
            answer: string_field(record, &["Answers", "answer"]).unwrap_or_default(),
            other_value: string_field(record, &["Notes", "other_value"]).unwrap_or_default(),
            is_hidden: bool_field(record, &["IsHidden", "is_hidden"]),
        })
    }
}

fn string_field(record: &serde_json::Value, names: &[&str]) -> Option<String> {
    for name in names {
        match record.get(name) {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                return Some(s.trim().to_string());
            }
            Some(serde_json::Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn bool_field(record: &serde_json::Value, names: &[&str]) -> bool {
    for name in names {
        match record.get(name) {
            Some(serde_json::Value::Bool(b)) => return *b,
            Some(serde_json::Value::Number(n)) => return n.as_i64() == Some(1),
            _ => {}
        }
    }
    false
}

fn int_field(record: &serde_json::Value, names: &[&str]) -> Option<i64> {
    for name in names {
        match record.get(name) {
            Some(serde_json::Value::Number(n)) => return n.as_i64(),
            Some(serde_json::Value::String(s)) => {
                if let Ok(parsed) = s.trim().parse() {
                    return Some(parsed);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_record_normalizes_field_variants() {
        let record = json!({
            "VisualID": 42,
            "Category": " Foundations ",
            "TemplateID": "7",
            "Name": "Foundation Cracks",
            "Kind": "Deficiency",
            "Answers": "Severe",
        });
        let visual = RemoteVisual::from_record(&record).unwrap();
        assert_eq!(visual.visual_id, "42");
        assert_eq!(visual.category, "Foundations");
        assert_eq!(visual.template_id, Some(7));
        assert_eq!(visual.kind, "Deficiency");
        assert!(!visual.is_hidden);
    }

    #[test]
    fn from_record_reads_hidden_flag_variants() {
        let record = json!({"VisualID": "V-1", "Category": "Roof", "IsHidden": true});
        assert!(RemoteVisual::from_record(&record).unwrap().is_hidden);
        let record = json!({"VisualID": "V-1", "Category": "Roof", "is_hidden": 1});
        assert!(RemoteVisual::from_record(&record).unwrap().is_hidden);
    }

    #[test]
    fn from_record_tolerates_legacy_rows() {
        let record = json!({"visual_id": "VIS-1", "category": "Roof"});
        let visual = RemoteVisual::from_record(&record).unwrap();
        assert_eq!(visual.template_id, None);
        assert_eq!(visual.name, "");
    }

    #[test]
    fn from_record_rejects_unidentifiable_rows() {
        assert!(RemoteVisual::from_record(&json!({"Category": "Roof"})).is_none());
        assert!(RemoteVisual::from_record(&json!({"VisualID": "VIS-1"})).is_none());
    }
}
