//! Local image model
//!
//! One row per captured or gallery-selected photo. `image_id` is the stable
//! UI key for the photo's entire lifecycle; `entity_id` may hold either a
//! temporary or a server-assigned visual id, so lookups must tolerate both.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::unix_millis_now;

/// Locally generated, stable photo identifier, format `img_<random>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    /// Create a new unique image ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("img_{}", Uuid::now_v7().simple()))
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an existing id string (from storage).
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.starts_with("img_") {
            Ok(Self(raw))
        } else {
            Err(Error::InvalidInput(format!("Not an image id: {raw}")))
        }
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pointer to locally stored raw bytes in the blob table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobId(String);

impl BlobId {
    /// Create a new unique blob ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("blob_{}", Uuid::now_v7().simple()))
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an existing id string (from storage).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sync lifecycle state of a photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageStatus {
    /// Captured locally, upload not yet queued to the remote.
    Local,
    /// Upload request sits in the outbox.
    Queued,
    /// Upload currently in flight.
    Uploading,
    /// Remote copy confirmed; `attach_id` is populated.
    Verified,
    /// Upload failed; retryable, caption editing still allowed.
    Failed,
}

impl ImageStatus {
    /// Stable storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Queued => "queued",
            Self::Uploading => "uploading",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }

    /// Parse from stable storage name.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "local" => Ok(Self::Local),
            "queued" => Ok(Self::Queued),
            "uploading" => Ok(Self::Uploading),
            "verified" => Ok(Self::Verified),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!(
                "Unknown image status: {other}"
            ))),
        }
    }
}

/// Photo metadata persisted locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalImage {
    /// Stable UI key; never changes across the photo's lifecycle.
    pub image_id: ImageId,
    /// Owning entity type (currently always "visual").
    pub entity_type: String,
    /// Owning entity's current id, temp or real.
    pub entity_id: String,
    /// Owning inspection service.
    pub service_id: String,
    /// Pointer to the locally stored bytes; `None` once pruned.
    pub local_blob_id: Option<BlobId>,
    /// Remote object key, set once uploaded.
    pub remote_key: Option<String>,
    /// Server-assigned attachment id, set once synced.
    pub attach_id: Option<String>,
    /// User caption.
    pub caption: String,
    /// Compressed annotation payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drawings: Option<Vec<u8>>,
    /// Sync state.
    pub status: ImageStatus,
    /// Set after the UI confirmed the remote-rendered copy actually loaded;
    /// gates local blob pruning.
    pub remote_loaded_in_ui: bool,
    /// Creation timestamp (Unix ms).
    pub created_at: i64,
    /// Last update timestamp (Unix ms).
    pub updated_at: i64,
}

impl LocalImage {
    /// Create a freshly captured, unsynced image record.
    pub fn captured(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        service_id: impl Into<String>,
        local_blob_id: BlobId,
        caption: impl Into<String>,
    ) -> Result<Self> {
        let entity_type = entity_type.into().trim().to_string();
        let entity_id = entity_id.into().trim().to_string();
        let service_id = service_id.into().trim().to_string();

        if entity_type.is_empty() {
            return Err(Error::InvalidInput(
                "Image entity_type cannot be empty".to_string(),
            ));
        }
        if entity_id.is_empty() {
            return Err(Error::InvalidInput(
                "Image entity_id cannot be empty".to_string(),
            ));
        }
        if service_id.is_empty() {
            return Err(Error::InvalidInput(
                "Image service_id cannot be empty".to_string(),
            ));
        }

        let now = unix_millis_now();
        Ok(Self {
            image_id: ImageId::new(),
            entity_type,
            entity_id,
            service_id,
            local_blob_id: Some(local_blob_id),
            remote_key: None,
            attach_id: None,
            caption: caption.into(),
            drawings: None,
            status: ImageStatus::Local,
            remote_loaded_in_ui: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether annotations have been saved for this photo.
    #[must_use]
    pub fn has_drawings(&self) -> bool {
        self.drawings.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// Local bytes may be pruned only after the remote copy is confirmed and
    /// the UI has rendered it at least once.
    #[must_use]
    pub const fn prunable(&self) -> bool {
        matches!(self.status, ImageStatus::Verified) && self.remote_loaded_in_ui
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_id_unique_and_stable_format() {
        let a = ImageId::new();
        let b = ImageId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("img_"));
        assert_eq!(ImageId::parse(a.as_str()).unwrap(), a);
        assert!(ImageId::parse("photo-1").is_err());
    }

    #[test]
    fn captured_validates_inputs() {
        assert!(LocalImage::captured("", "e", "s", BlobId::new(), "").is_err());
        assert!(LocalImage::captured("visual", "", "s", BlobId::new(), "").is_err());
        assert!(LocalImage::captured("visual", "e", "", BlobId::new(), "").is_err());

        let image = LocalImage::captured("visual", "temp_visual_1", "svc", BlobId::new(), "")
            .unwrap();
        assert_eq!(image.status, ImageStatus::Local);
        assert!(image.local_blob_id.is_some());
        assert!(!image.has_drawings());
    }

    #[test]
    fn status_round_trip() {
        for status in [
            ImageStatus::Local,
            ImageStatus::Queued,
            ImageStatus::Uploading,
            ImageStatus::Verified,
            ImageStatus::Failed,
        ] {
            assert_eq!(ImageStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ImageStatus::parse("done").is_err());
    }

    #[test]
    fn prunable_requires_verified_and_ui_confirmation() {
        let mut image =
            LocalImage::captured("visual", "VIS-1", "svc", BlobId::new(), "").unwrap();
        assert!(!image.prunable());

        image.status = ImageStatus::Verified;
        assert!(!image.prunable());

        image.remote_loaded_in_ui = true;
        assert!(image.prunable());
    }
}
