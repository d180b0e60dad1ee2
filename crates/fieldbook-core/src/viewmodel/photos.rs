//! Rendered photo entries and the display-source non-regression rule.

use crate::models::{ImageId, ImageStatus, LocalImage};
use crate::stores::PLACEHOLDER_URL;

/// One photo row as the page renders it, keyed by the stable image id for
/// the photo's entire lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoEntry {
    pub image_id: ImageId,
    pub display_url: String,
    pub caption: String,
    pub has_annotations: bool,
    pub status: ImageStatus,
    /// Upload was rejected; the photo stays visible and caption-editable
    /// with a retry affordance.
    pub upload_failed: bool,
}

impl PhotoEntry {
    /// Build a fresh entry from a stored image and a resolved display source.
    #[must_use]
    pub fn new(image: &LocalImage, display_url: String) -> Self {
        Self {
            image_id: image.image_id.clone(),
            display_url,
            caption: image.caption.clone(),
            has_annotations: image.has_drawings(),
            status: image.status,
            upload_failed: image.status == ImageStatus::Failed,
        }
    }

    /// Refresh metadata from a newer snapshot of the image.
    ///
    /// The display source is non-regressive: once this entry renders from a
    /// local blob, no background refresh may swap in a remote URL or the
    /// placeholder. A local candidate always wins; the placeholder never
    /// replaces anything that currently renders.
    pub fn refresh(&mut self, image: &LocalImage, candidate_url: String) {
        self.caption.clone_from(&image.caption);
        self.has_annotations = image.has_drawings();
        self.status = image.status;
        self.upload_failed = image.status == ImageStatus::Failed;

        if is_local_source(&self.display_url) && !is_local_source(&candidate_url) {
            return;
        }
        if candidate_url == PLACEHOLDER_URL && self.display_url != PLACEHOLDER_URL {
            return;
        }
        self.display_url = candidate_url;
    }
}

/// Whether a display source points at locally stored bytes.
#[must_use]
pub fn is_local_source(url: &str) -> bool {
    url.starts_with("blob://")
}

/// Photo rows for one item, deduplicated by stable image id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhotoList {
    entries: Vec<PhotoEntry>,
}

impl PhotoList {
    /// Insert a new entry or refresh the existing one for the same image.
    pub fn upsert(&mut self, image: &LocalImage, display_url: String) {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.image_id == image.image_id)
        {
            Some(entry) => entry.refresh(image, display_url),
            None => self.entries.push(PhotoEntry::new(image, display_url)),
        }
    }

    /// Drop the entry for an image, if present.
    pub fn remove(&mut self, image_id: &ImageId) {
        self.entries.retain(|entry| &entry.image_id != image_id);
    }

    #[must_use]
    pub fn get(&self, image_id: &ImageId) -> Option<&PhotoEntry> {
        self.entries.iter().find(|entry| &entry.image_id == image_id)
    }

    #[must_use]
    pub fn entries(&self) -> &[PhotoEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlobId;
    use pretty_assertions::assert_eq;

    fn image() -> LocalImage {
        LocalImage::captured("visual", "VIS-1", "svc", BlobId::new(), "cap").unwrap()
    }

    #[test]
    fn local_source_never_regresses_to_remote() {
        let image = image();
        let mut entry = PhotoEntry::new(&image, "blob://b1".to_string());

        entry.refresh(&image, "https://cdn.example.com/x.jpg".to_string());
        assert_eq!(entry.display_url, "blob://b1");

        entry.refresh(&image, PLACEHOLDER_URL.to_string());
        assert_eq!(entry.display_url, "blob://b1");
    }

    #[test]
    fn remote_source_upgrades_to_local() {
        let image = image();
        let mut entry = PhotoEntry::new(&image, "https://cdn.example.com/x.jpg".to_string());

        entry.refresh(&image, "blob://b1".to_string());
        assert_eq!(entry.display_url, "blob://b1");
    }

    #[test]
    fn placeholder_never_replaces_a_real_source() {
        let image = image();
        let mut entry = PhotoEntry::new(&image, "https://cdn.example.com/x.jpg".to_string());

        entry.refresh(&image, PLACEHOLDER_URL.to_string());
        assert_eq!(entry.display_url, "https://cdn.example.com/x.jpg");
    }

    #[test]
    fn refresh_updates_metadata_even_when_source_is_kept() {
        let mut image = image();
        let mut entry = PhotoEntry::new(&image, "blob://b1".to_string());

        image.caption = "North wall".to_string();
        image.drawings = Some(vec![1, 2, 3]);
        entry.refresh(&image, PLACEHOLDER_URL.to_string());

        assert_eq!(entry.caption, "North wall");
        assert!(entry.has_annotations);
        assert_eq!(entry.display_url, "blob://b1");
    }

    #[test]
    fn upsert_dedupes_by_image_id() {
        let image = image();
        let mut list = PhotoList::default();
        list.upsert(&image, "blob://b1".to_string());
        list.upsert(&image, "https://cdn.example.com/x.jpg".to_string());

        assert_eq!(list.len(), 1);
        assert_eq!(list.entries()[0].display_url, "blob://b1");
    }
}
