//! Inspection template model

use serde::{Deserialize, Serialize};

use super::visual_field::VisualKind;

/// A template item that seeds one [`super::VisualField`] per category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionTemplate {
    /// Template identifier; unique within a category.
    pub template_id: i64,
    /// Display name.
    pub name: String,
    /// Body text shown under the name.
    pub text: String,
    /// Item kind.
    pub kind: VisualKind,
    /// Ordered dropdown options for the answer control.
    pub dropdown_options: Vec<String>,
}

impl InspectionTemplate {
    /// Convenience constructor used by seeding code and tests.
    #[must_use]
    pub fn new(
        template_id: i64,
        name: impl Into<String>,
        text: impl Into<String>,
        kind: VisualKind,
        dropdown_options: Vec<String>,
    ) -> Self {
        Self {
            template_id,
            name: name.into(),
            text: text.into(),
            kind,
            dropdown_options,
        }
    }
}
