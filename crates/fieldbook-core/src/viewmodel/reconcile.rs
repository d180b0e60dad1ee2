//! Reload-after-sync reconciliation of remote visuals into page items.

use crate::models::{VisualField, VisualId, VisualKind};
use crate::remote::RemoteVisual;
use crate::viewmodel::category_detail::CategoryItem;

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Items whose values actually changed.
    pub updated: usize,
    /// Remote visuals quarantined as orphan rows.
    pub orphaned: usize,
}

/// Merge server-confirmed visuals into the in-memory items.
///
/// Matching is by template id first, then by (name, kind) for legacy records
/// without one; the fallback is ambiguous when two templates share a name,
/// so the first match wins with a warning. Two visuals resolving to the same
/// item is a key collision: the second becomes an orphan row instead of
/// silently overwriting the first. Values are written only when they differ,
/// so an unchanged pass causes no downstream flicker.
pub fn reconcile_items(
    items: &mut Vec<CategoryItem>,
    remote: &[RemoteVisual],
    service_id: &str,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let mut claimed: Vec<usize> = Vec::new();

    for visual in remote {
        let index = match_item(items, visual);
        match index {
            Some(index) if claimed.contains(&index) => {
                tracing::warn!(
                    visual_id = %visual.visual_id,
                    template_id = ?visual.template_id,
                    "Key collision during reconciliation; quarantining as orphan"
                );
                items.push(CategoryItem::orphaned(orphan_field(visual, service_id)));
                report.orphaned += 1;
            }
            Some(index) => {
                claimed.push(index);
                if apply_visual(&mut items[index], visual) {
                    report.updated += 1;
                }
            }
            None => {
                items.push(CategoryItem::orphaned(orphan_field(visual, service_id)));
                report.orphaned += 1;
            }
        }
    }
    report
}

fn match_item(items: &[CategoryItem], visual: &RemoteVisual) -> Option<usize> {
    if let Some(template_id) = visual.template_id {
        return items
            .iter()
            .position(|item| !item.orphan && item.field.template_id == template_id);
    }

    let matches: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| {
            !item.orphan
                && item.field.template_name.eq_ignore_ascii_case(&visual.name)
                && item.field.kind.as_str().eq_ignore_ascii_case(&visual.kind)
        })
        .map(|(index, _)| index)
        .collect();
    if matches.len() > 1 {
        tracing::warn!(
            name = %visual.name,
            kind = %visual.kind,
            candidates = matches.len(),
            "Ambiguous name/kind fallback match; first wins"
        );
    }
    matches.first().copied()
}

/// Write a remote visual into an item, returning whether anything changed.
fn apply_visual(item: &mut CategoryItem, visual: &RemoteVisual) -> bool {
    let field = &mut item.field;
    let mut changed = false;

    let visual_id = VisualId::new(&visual.visual_id).ok();
    if visual_id.is_some() && field.visual_id != visual_id {
        field.visual_id = visual_id;
        changed = true;
    }
    // A locally hidden row is an unselect the server may not have seen yet;
    // never resurrect it here. Otherwise server visibility wins.
    if !field.is_hidden {
        if field.is_selected == visual.is_hidden {
            field.is_selected = !visual.is_hidden;
            changed = true;
        }
        if field.is_hidden != visual.is_hidden {
            field.is_hidden = visual.is_hidden;
            changed = true;
        }
    }
    if field.answer != visual.answer {
        field.answer.clone_from(&visual.answer);
        changed = true;
    }
    if field.other_value != visual.other_value {
        field.other_value.clone_from(&visual.other_value);
        changed = true;
    }
    if changed {
        item.saving = false;
    }
    changed
}

fn orphan_field(visual: &RemoteVisual, service_id: &str) -> VisualField {
    let kind: VisualKind = visual.kind.parse().unwrap_or(VisualKind::Comment);
    let mut field = VisualField::seeded(
        service_id,
        &visual.category,
        visual.template_id.unwrap_or(0),
        kind,
        &visual.name,
        "",
        Vec::new(),
    );
    field.visual_id = VisualId::new(&visual.visual_id).ok();
    field.is_selected = !visual.is_hidden;
    field.is_hidden = visual.is_hidden;
    field.answer.clone_from(&visual.answer);
    field.other_value.clone_from(&visual.other_value);
    field
}
