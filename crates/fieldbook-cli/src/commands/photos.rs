use std::path::Path;

use fieldbook_core::capture::CapturedFile;
use fieldbook_core::models::ImageId;
use serde::Serialize;

use crate::commands::common::open_app;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct PhotoListItem {
    pub image_id: String,
    pub status: String,
    pub caption: String,
    pub annotated: bool,
    pub attach_id: Option<String>,
    pub local_copy: bool,
}

pub async fn run_capture(
    service: &str,
    category: &str,
    template_id: i64,
    files: &[std::path::PathBuf],
    db_path: &Path,
) -> Result<(), CliError> {
    let app = open_app(db_path).await?;
    let field = app
        .fields
        .get(service, category, template_id)
        .await?
        .ok_or(CliError::FieldNotFound(template_id))?;
    let entity_id = field
        .current_id()
        .ok_or(CliError::FieldNotFound(template_id))?;

    let mut stored = 0usize;
    for path in files {
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Err(CliError::EmptyFile(path.display().to_string()));
        }
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let image = app
            .images
            .capture_image(&CapturedFile::new(name, bytes), "visual", &entity_id, service, "")
            .await?;
        println!("Stored {} as {}", path.display(), image.image_id);
        stored += 1;
    }
    println!("{stored} photos queued for upload");
    Ok(())
}

pub async fn run_photos(
    service: &str,
    category: &str,
    template_id: i64,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let app = open_app(db_path).await?;
    let field = app
        .fields
        .get(service, category, template_id)
        .await?
        .ok_or(CliError::FieldNotFound(template_id))?;
    let Some(entity_id) = field.current_id() else {
        println!("No photos (field has never been selected)");
        return Ok(());
    };

    let images = app.images.images_for_entity(&entity_id).await?;
    if as_json {
        let items: Vec<PhotoListItem> = images
            .iter()
            .map(|image| PhotoListItem {
                image_id: image.image_id.to_string(),
                status: format!("{:?}", image.status).to_lowercase(),
                caption: image.caption.clone(),
                annotated: image.has_drawings(),
                attach_id: image.attach_id.clone(),
                local_copy: image.local_blob_id.is_some(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for image in &images {
            let caption = if image.caption.is_empty() {
                String::new()
            } else {
                format!("  \"{}\"", image.caption)
            };
            println!("{}  {:?}{caption}", image.image_id, image.status);
        }
        println!("{} photos", images.len());
        if app.remote_configured {
            if let Some(visual_id) = &field.visual_id {
                let remote = app.images.remote_photo_count(visual_id.as_str()).await;
                println!("{remote} confirmed on server");
            }
        }
    }
    Ok(())
}

pub async fn run_caption(
    image_id: &str,
    caption: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let app = open_app(db_path).await?;
    let image_id = ImageId::parse(image_id)
        .map_err(|_| CliError::PhotoNotFound(image_id.to_string()))?;
    app.images
        .get(&image_id)
        .await?
        .ok_or_else(|| CliError::PhotoNotFound(image_id.to_string()))?;
    app.images.update_caption(&image_id, caption).await?;
    println!("Caption saved; remote update queued");
    Ok(())
}
