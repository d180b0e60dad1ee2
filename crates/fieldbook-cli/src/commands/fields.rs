use std::path::Path;

use fieldbook_core::db::FieldPatch;
use fieldbook_core::models::{InspectionTemplate, TempVisualId, VisualField};
use serde::Serialize;

use crate::commands::common::open_app;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct FieldListItem {
    pub template_id: i64,
    pub name: String,
    pub kind: String,
    pub selected: bool,
    pub hidden: bool,
    pub answer: String,
    pub entity_id: Option<String>,
    pub photo_count: i64,
}

fn to_item(field: &VisualField) -> FieldListItem {
    FieldListItem {
        template_id: field.template_id,
        name: field.template_name.clone(),
        kind: field.kind.as_str().to_string(),
        selected: field.is_selected,
        hidden: field.is_hidden,
        answer: field.answer.clone(),
        entity_id: field.current_id(),
        photo_count: field.photo_count,
    }
}

pub async fn run_seed(
    service: &str,
    category: &str,
    file: &Path,
    db_path: &Path,
) -> Result<(), CliError> {
    let raw = std::fs::read_to_string(file)?;
    let templates: Vec<InspectionTemplate> = serde_json::from_str(&raw)?;

    let app = open_app(db_path).await?;
    let created = app
        .fields
        .seed_from_templates(service, category, &templates)
        .await?;
    println!("Seeded {created} new fields ({} templates)", templates.len());
    Ok(())
}

pub async fn run_fields(
    service: &str,
    category: &str,
    all: bool,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let app = open_app(db_path).await?;
    let fields: Vec<VisualField> = app
        .fields
        .list_category(service, category)
        .await?
        .into_iter()
        .filter(|field| all || !field.is_hidden)
        .collect();

    if as_json {
        let items: Vec<FieldListItem> = fields.iter().map(to_item).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for field in &fields {
            let mark = if field.is_selected { "x" } else { " " };
            let answer = if field.answer.is_empty() {
                String::new()
            } else {
                format!(" — {}", field.answer)
            };
            println!(
                "[{mark}] {:>4}  {} ({}){answer}  photos: {}",
                field.template_id,
                field.template_name,
                field.kind.as_str(),
                field.photo_count
            );
        }
    }
    Ok(())
}

pub async fn run_select(
    service: &str,
    category: &str,
    template_id: i64,
    off: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let app = open_app(db_path).await?;
    let field = app
        .fields
        .get(service, category, template_id)
        .await?
        .ok_or(CliError::FieldNotFound(template_id))?;

    if off {
        app.fields
            .set_field(
                service,
                category,
                template_id,
                FieldPatch {
                    is_selected: Some(false),
                    is_hidden: Some(true),
                    ..FieldPatch::default()
                },
            )
            .await?;
        println!("Unselected {} (row hidden, photos kept)", field.template_name);
        return Ok(());
    }

    let mut patch = FieldPatch {
        is_selected: Some(true),
        is_hidden: Some(false),
        ..FieldPatch::default()
    };
    let temp = if field.current_id().is_none() {
        let temp = TempVisualId::new();
        patch.temp_visual_id = Some(Some(temp.clone()));
        Some(temp)
    } else {
        None
    };
    let updated = app
        .fields
        .set_field(service, category, template_id, patch)
        .await?;

    if let Some(temp) = temp {
        app.outbox
            .enqueue(
                fieldbook_core::models::RequestOp::Create,
                fieldbook_core::stores::VISUALS_TABLE,
                serde_json::json!({
                    "ServiceID": service,
                    "Category": category,
                    "TemplateID": template_id,
                    "Name": updated.template_name,
                    "Kind": updated.kind.as_str(),
                }),
                Some(temp.as_str().to_string()),
                None,
            )
            .await?;
    }
    println!(
        "Selected {} (entity {})",
        updated.template_name,
        updated.current_id().unwrap_or_default()
    );
    Ok(())
}

pub async fn run_answer(
    service: &str,
    category: &str,
    template_id: i64,
    answer: &str,
    other: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let app = open_app(db_path).await?;
    app.fields
        .get(service, category, template_id)
        .await?
        .ok_or(CliError::FieldNotFound(template_id))?;

    let empty = answer.trim().is_empty() && other.trim().is_empty();
    let updated = app
        .fields
        .set_field(
            service,
            category,
            template_id,
            FieldPatch {
                answer: Some(answer.to_string()),
                other_value: Some(other.to_string()),
                is_hidden: Some(empty),
                is_selected: Some(!empty),
                ..FieldPatch::default()
            },
        )
        .await?;

    if let Some(entity_id) = updated.current_id() {
        app.outbox
            .enqueue(
                fieldbook_core::models::RequestOp::Update,
                fieldbook_core::stores::VISUALS_TABLE,
                serde_json::json!({ "Answer": answer, "OtherValue": other }),
                Some(entity_id),
                None,
            )
            .await?;
    }
    if empty {
        println!("Cleared answer; row hidden (photos kept)");
    } else {
        println!("Answer saved");
    }
    Ok(())
}
