//! Visual field model
//!
//! One row per inspection template item per (service, category). A field is
//! identified remotely by `visual_id` once the server has confirmed it, and by
//! `temp_visual_id` while the create is still in flight. Readers must tolerate
//! the window where only the temp id is populated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::unix_millis_now;

/// Prefix for locally assigned temporary visual ids.
pub const TEMP_VISUAL_PREFIX: &str = "temp_visual_";

/// Server-assigned identifier for a visual record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisualId(String);

impl VisualId {
    /// Wrap a server-assigned id. Rejects empty values.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(Error::InvalidInput(
                "Visual id cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VisualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Locally assigned temporary visual id, format `temp_visual_<random>`.
///
/// Survives app restarts; replaced by a [`VisualId`] only after the remote
/// create has been confirmed by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TempVisualId(String);

impl TempVisualId {
    /// Create a new unique temporary id using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("{TEMP_VISUAL_PREFIX}{}", Uuid::now_v7().simple()))
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a raw entity id carries the temp prefix.
    #[must_use]
    pub fn is_temp(raw: &str) -> bool {
        raw.starts_with(TEMP_VISUAL_PREFIX)
    }
}

impl Default for TempVisualId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TempVisualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TempVisualId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if Self::is_temp(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidInput(format!(
                "Not a temporary visual id: {s}"
            )))
        }
    }
}

/// Kind of inspection item a field represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VisualKind {
    Comment,
    Limitation,
    Deficiency,
}

impl VisualKind {
    /// Stable storage/wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Comment => "Comment",
            Self::Limitation => "Limitation",
            Self::Deficiency => "Deficiency",
        }
    }
}

impl fmt::Display for VisualKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisualKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Comment" => Ok(Self::Comment),
            "Limitation" => Ok(Self::Limitation),
            "Deficiency" => Ok(Self::Deficiency),
            other => Err(Error::InvalidInput(format!("Unknown visual kind: {other}"))),
        }
    }
}

/// A structured inspection field, one per (service, category, template item).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualField {
    /// Owning inspection service.
    pub service_id: String,
    /// Category the field belongs to (e.g. "Foundations").
    pub category: String,
    /// Template item identifier. Zero on legacy records.
    pub template_id: i64,
    /// Server-assigned id, set once the remote create is confirmed.
    pub visual_id: Option<VisualId>,
    /// Local temporary id, cleared when `visual_id` is set.
    pub temp_visual_id: Option<TempVisualId>,
    /// Whether the user has the item selected.
    pub is_selected: bool,
    /// Answer value; comma-joined for multi-select items.
    pub answer: String,
    /// Free-text "other" value.
    pub other_value: String,
    /// Item kind.
    pub kind: VisualKind,
    /// Template display name.
    pub template_name: String,
    /// Template body text.
    pub template_text: String,
    /// Ordered dropdown options for the answer control.
    pub dropdown_options: Vec<String>,
    /// Cached photo count for list display.
    pub photo_count: i64,
    /// Soft-hide flag; photos are retained for possible reselection.
    pub is_hidden: bool,
    /// Creation timestamp (Unix ms).
    pub created_at: i64,
    /// Last update timestamp (Unix ms).
    pub updated_at: i64,
}

impl VisualField {
    /// Create a fresh, unselected field seeded from a template.
    #[must_use]
    pub fn seeded(
        service_id: impl Into<String>,
        category: impl Into<String>,
        template_id: i64,
        kind: VisualKind,
        template_name: impl Into<String>,
        template_text: impl Into<String>,
        dropdown_options: Vec<String>,
    ) -> Self {
        let now = unix_millis_now();
        Self {
            service_id: service_id.into(),
            category: category.into(),
            template_id,
            visual_id: None,
            temp_visual_id: None,
            is_selected: false,
            answer: String::new(),
            other_value: String::new(),
            kind,
            template_name: template_name.into(),
            template_text: template_text.into(),
            dropdown_options,
            photo_count: 0,
            is_hidden: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// The id that currently identifies this field's visual record: the real
    /// id when present, else the temp id, else `None` (never persisted
    /// remotely and never selected).
    #[must_use]
    pub fn current_id(&self) -> Option<String> {
        if let Some(id) = &self.visual_id {
            return Some(id.as_str().to_string());
        }
        self.temp_visual_id
            .as_ref()
            .map(|id| id.as_str().to_string())
    }

    /// Whether the answer set is effectively empty (no selections and no
    /// free-text other value).
    #[must_use]
    pub fn answer_is_empty(&self) -> bool {
        self.answer.trim().is_empty() && self.other_value.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_visual_id_unique_and_prefixed() {
        let a = TempVisualId::new();
        let b = TempVisualId::new();
        assert_ne!(a, b);
        assert!(TempVisualId::is_temp(a.as_str()));
    }

    #[test]
    fn temp_visual_id_rejects_foreign_strings() {
        assert!("VIS-123".parse::<TempVisualId>().is_err());
        assert!(format!("{TEMP_VISUAL_PREFIX}abc")
            .parse::<TempVisualId>()
            .is_ok());
    }

    #[test]
    fn visual_id_rejects_empty() {
        assert!(VisualId::new("  ").is_err());
        assert_eq!(VisualId::new(" VIS-9 ").unwrap().as_str(), "VIS-9");
    }

    #[test]
    fn kind_round_trip() {
        for kind in [
            VisualKind::Comment,
            VisualKind::Limitation,
            VisualKind::Deficiency,
        ] {
            assert_eq!(kind.as_str().parse::<VisualKind>().unwrap(), kind);
        }
        assert!("Observation".parse::<VisualKind>().is_err());
    }

    #[test]
    fn current_id_prefers_real() {
        let mut field =
            VisualField::seeded("svc", "Foundations", 7, VisualKind::Comment, "n", "t", vec![]);
        assert_eq!(field.current_id(), None);

        let temp = TempVisualId::new();
        field.temp_visual_id = Some(temp.clone());
        assert_eq!(field.current_id(), Some(temp.as_str().to_string()));

        field.visual_id = Some(VisualId::new("VIS-1").unwrap());
        assert_eq!(field.current_id(), Some("VIS-1".to_string()));
    }

    #[test]
    fn answer_is_empty_considers_other_value() {
        let mut field =
            VisualField::seeded("svc", "Roof", 1, VisualKind::Deficiency, "n", "t", vec![]);
        assert!(field.answer_is_empty());
        field.other_value = "custom".to_string();
        assert!(!field.answer_is_empty());
    }
}
