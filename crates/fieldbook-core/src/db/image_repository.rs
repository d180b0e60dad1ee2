//! Local image and blob repository implementation

use crate::error::{Error, Result};
use crate::models::{BlobId, ImageId, ImageStatus, LocalImage};
use rusqlite::{params, Connection};

/// Trait for local image storage operations
pub trait ImageRepository {
    /// Insert an image and its blob bytes atomically.
    fn insert(&self, image: &LocalImage, bytes: &[u8]) -> Result<()>;

    /// Get an image by its stable id.
    fn get(&self, image_id: &ImageId) -> Result<Option<LocalImage>>;

    /// List images whose `entity_id` is any of the given ids, oldest first.
    fn list_for_entities(&self, entity_ids: &[String]) -> Result<Vec<LocalImage>>;

    /// List all images for a service.
    fn list_for_service(&self, service_id: &str) -> Result<Vec<LocalImage>>;

    /// Count images attached to any of the given entity ids.
    fn count_for_entities(&self, entity_ids: &[String]) -> Result<i64>;

    /// Update the caption.
    fn set_caption(&self, image_id: &ImageId, caption: &str) -> Result<()>;

    /// Update the compressed annotation payload.
    fn set_drawings(&self, image_id: &ImageId, drawings: Option<&[u8]>) -> Result<()>;

    /// Update the sync status.
    fn set_status(&self, image_id: &ImageId, status: ImageStatus) -> Result<()>;

    /// Record remote confirmation: attach id, object key, verified status.
    fn set_remote(&self, image_id: &ImageId, attach_id: &str, remote_key: &str) -> Result<()>;

    /// Mark that the UI rendered the remote copy; gates blob pruning.
    fn set_remote_loaded(&self, image_id: &ImageId) -> Result<()>;

    /// Drop the local blob if (and only if) the image is prunable.
    fn prune_blob(&self, image_id: &ImageId) -> Result<bool>;

    /// Fetch stored blob bytes.
    fn blob_bytes(&self, blob_id: &BlobId) -> Result<Option<Vec<u8>>>;

    /// Delete an image and its blob atomically.
    fn delete(&self, image_id: &ImageId) -> Result<()>;

    /// Rewrite `entity_id` for every image filed under `old_entity_id`,
    /// all-or-nothing. Returns the rehomed image ids.
    fn rehome(&self, old_entity_id: &str, new_entity_id: &str) -> Result<Vec<ImageId>>;
}

/// `SQLite` implementation of `ImageRepository`
pub struct SqliteImageRepository<'a> {
    conn: &'a Connection,
}

const IMAGE_COLUMNS: &str = "image_id, entity_type, entity_id, service_id, local_blob_id, \
     remote_key, attach_id, caption, drawings, status, remote_loaded_in_ui, \
     created_at, updated_at";

impl<'a> SqliteImageRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_image(row: &rusqlite::Row<'_>) -> rusqlite::Result<LocalImage> {
        let image_id: String = row.get(0)?;
        let local_blob_id: Option<String> = row.get(4)?;
        let status: String = row.get(9)?;
        Ok(LocalImage {
            image_id: ImageId::parse(image_id).unwrap_or_default(),
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            service_id: row.get(3)?,
            local_blob_id: local_blob_id.map(BlobId::from_raw),
            remote_key: row.get(5)?,
            attach_id: row.get(6)?,
            caption: row.get(7)?,
            drawings: row.get(8)?,
            status: ImageStatus::parse(&status).unwrap_or(ImageStatus::Local),
            remote_loaded_in_ui: row.get::<_, i32>(10)? != 0,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn touch(&self, image_id: &ImageId) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE images SET updated_at = ? WHERE image_id = ?",
            params![crate::util::unix_millis_now(), image_id.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(image_id.to_string()));
        }
        Ok(())
    }

    fn placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }
}

impl ImageRepository for SqliteImageRepository<'_> {
    fn insert(&self, image: &LocalImage, bytes: &[u8]) -> Result<()> {
        let blob_id = image.local_blob_id.as_ref().ok_or_else(|| {
            Error::InvalidInput("Cannot insert an image without a local blob".to_string())
        })?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO blobs (blob_id, bytes, size_bytes, created_at) VALUES (?, ?, ?, ?)",
            params![
                blob_id.as_str(),
                bytes,
                bytes.len() as i64,
                image.created_at
            ],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO images ({IMAGE_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                image.image_id.as_str(),
                image.entity_type,
                image.entity_id,
                image.service_id,
                blob_id.as_str(),
                image.remote_key,
                image.attach_id,
                image.caption,
                image.drawings,
                image.status.as_str(),
                i32::from(image.remote_loaded_in_ui),
                image.created_at,
                image.updated_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get(&self, image_id: &ImageId) -> Result<Option<LocalImage>> {
        let result = self.conn.query_row(
            &format!("SELECT {IMAGE_COLUMNS} FROM images WHERE image_id = ?"),
            params![image_id.as_str()],
            Self::parse_image,
        );
        match result {
            Ok(image) => Ok(Some(image)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_for_entities(&self, entity_ids: &[String]) -> Result<Vec<LocalImage>> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images
             WHERE entity_id IN ({})
             ORDER BY created_at ASC",
            Self::placeholders(entity_ids.len())
        ))?;
        let images = stmt
            .query_map(
                rusqlite::params_from_iter(entity_ids.iter()),
                Self::parse_image,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(images)
    }

    fn list_for_service(&self, service_id: &str) -> Result<Vec<LocalImage>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images
             WHERE service_id = ?
             ORDER BY created_at ASC"
        ))?;
        let images = stmt
            .query_map(params![service_id], Self::parse_image)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(images)
    }

    fn count_for_entities(&self, entity_ids: &[String]) -> Result<i64> {
        if entity_ids.is_empty() {
            return Ok(0);
        }
        let count = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM images WHERE entity_id IN ({})",
                Self::placeholders(entity_ids.len())
            ),
            rusqlite::params_from_iter(entity_ids.iter()),
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn set_caption(&self, image_id: &ImageId, caption: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET caption = ? WHERE image_id = ?",
            params![caption, image_id.as_str()],
        )?;
        self.touch(image_id)
    }

    fn set_drawings(&self, image_id: &ImageId, drawings: Option<&[u8]>) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET drawings = ? WHERE image_id = ?",
            params![drawings, image_id.as_str()],
        )?;
        self.touch(image_id)
    }

    fn set_status(&self, image_id: &ImageId, status: ImageStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET status = ? WHERE image_id = ?",
            params![status.as_str(), image_id.as_str()],
        )?;
        self.touch(image_id)
    }

    fn set_remote(&self, image_id: &ImageId, attach_id: &str, remote_key: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET attach_id = ?, remote_key = ?, status = ? WHERE image_id = ?",
            params![
                attach_id,
                remote_key,
                ImageStatus::Verified.as_str(),
                image_id.as_str()
            ],
        )?;
        self.touch(image_id)
    }

    fn set_remote_loaded(&self, image_id: &ImageId) -> Result<()> {
        self.conn.execute(
            "UPDATE images SET remote_loaded_in_ui = 1 WHERE image_id = ?",
            params![image_id.as_str()],
        )?;
        self.touch(image_id)
    }

    fn prune_blob(&self, image_id: &ImageId) -> Result<bool> {
        let Some(image) = self.get(image_id)? else {
            return Err(Error::NotFound(image_id.to_string()));
        };
        if !image.prunable() {
            return Ok(false);
        }
        let Some(blob_id) = image.local_blob_id else {
            return Ok(false);
        };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE images SET local_blob_id = NULL, updated_at = ? WHERE image_id = ?",
            params![crate::util::unix_millis_now(), image_id.as_str()],
        )?;
        tx.execute("DELETE FROM blobs WHERE blob_id = ?", params![blob_id.as_str()])?;
        tx.commit()?;
        Ok(true)
    }

    fn blob_bytes(&self, blob_id: &BlobId) -> Result<Option<Vec<u8>>> {
        let result = self.conn.query_row(
            "SELECT bytes FROM blobs WHERE blob_id = ?",
            params![blob_id.as_str()],
            |row| row.get(0),
        );
        match result {
            Ok(bytes) => Ok(Some(bytes)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, image_id: &ImageId) -> Result<()> {
        let Some(image) = self.get(image_id)? else {
            return Err(Error::NotFound(image_id.to_string()));
        };
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM images WHERE image_id = ?",
            params![image_id.as_str()],
        )?;
        if let Some(blob_id) = image.local_blob_id {
            tx.execute("DELETE FROM blobs WHERE blob_id = ?", params![blob_id.as_str()])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn rehome(&self, old_entity_id: &str, new_entity_id: &str) -> Result<Vec<ImageId>> {
        let tx = self.conn.unchecked_transaction()?;
        let rehomed = {
            let mut stmt =
                tx.prepare("SELECT image_id FROM images WHERE entity_id = ?")?;
            let ids = stmt
                .query_map(params![old_entity_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            tx.execute(
                "UPDATE images SET entity_id = ?, updated_at = ? WHERE entity_id = ?",
                params![
                    new_entity_id,
                    crate::util::unix_millis_now(),
                    old_entity_id
                ],
            )?;
            ids
        };
        tx.commit()?;
        Ok(rehomed
            .into_iter()
            .filter_map(|id| ImageId::parse(id).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn sample(entity_id: &str) -> LocalImage {
        LocalImage::captured("visual", entity_id, "svc", BlobId::new(), "").unwrap()
    }

    #[test]
    fn insert_and_get_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteImageRepository::new(db.connection());

        let image = sample("temp_visual_a");
        repo.insert(&image, b"jpeg-bytes").unwrap();

        let fetched = repo.get(&image.image_id).unwrap().unwrap();
        assert_eq!(fetched, image);
        let bytes = repo
            .blob_bytes(fetched.local_blob_id.as_ref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(bytes, b"jpeg-bytes");
    }

    #[test]
    fn list_for_entities_unions_ids() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteImageRepository::new(db.connection());

        repo.insert(&sample("temp_visual_a"), b"a").unwrap();
        repo.insert(&sample("VIS-1"), b"b").unwrap();
        repo.insert(&sample("VIS-2"), b"c").unwrap();

        let images = repo
            .list_for_entities(&["temp_visual_a".to_string(), "VIS-1".to_string()])
            .unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(
            repo.count_for_entities(&["temp_visual_a".to_string(), "VIS-1".to_string()])
                .unwrap(),
            2
        );
        assert!(repo.list_for_entities(&[]).unwrap().is_empty());
    }

    #[test]
    fn rehome_is_atomic_and_complete() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteImageRepository::new(db.connection());

        let a = sample("temp_visual_a");
        let b = sample("temp_visual_a");
        let other = sample("VIS-9");
        repo.insert(&a, b"a").unwrap();
        repo.insert(&b, b"b").unwrap();
        repo.insert(&other, b"c").unwrap();

        let rehomed = repo.rehome("temp_visual_a", "VIS-1").unwrap();
        assert_eq!(rehomed.len(), 2);

        let moved = repo.list_for_entities(&["VIS-1".to_string()]).unwrap();
        assert_eq!(moved.len(), 2);
        assert!(repo
            .list_for_entities(&["temp_visual_a".to_string()])
            .unwrap()
            .is_empty());
        // Unrelated rows untouched.
        assert_eq!(
            repo.list_for_entities(&["VIS-9".to_string()]).unwrap().len(),
            1
        );
    }

    #[test]
    fn prune_blob_respects_gate() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteImageRepository::new(db.connection());

        let image = sample("VIS-1");
        repo.insert(&image, b"bytes").unwrap();

        // Not verified yet: refuse.
        assert!(!repo.prune_blob(&image.image_id).unwrap());

        repo.set_remote(&image.image_id, "AT-1", "svc/photo.jpg").unwrap();
        // Verified but UI has not rendered the remote copy: still refuse.
        assert!(!repo.prune_blob(&image.image_id).unwrap());

        repo.set_remote_loaded(&image.image_id).unwrap();
        assert!(repo.prune_blob(&image.image_id).unwrap());

        let pruned = repo.get(&image.image_id).unwrap().unwrap();
        assert!(pruned.local_blob_id.is_none());
        assert_eq!(pruned.status, ImageStatus::Verified);
    }

    #[test]
    fn delete_removes_blob_row() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteImageRepository::new(db.connection());

        let image = sample("VIS-1");
        let blob_id = image.local_blob_id.clone().unwrap();
        repo.insert(&image, b"bytes").unwrap();
        repo.delete(&image.image_id).unwrap();

        assert!(repo.get(&image.image_id).unwrap().is_none());
        assert!(repo.blob_bytes(&blob_id).unwrap().is_none());
    }

    #[test]
    fn caption_and_drawings_updates() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteImageRepository::new(db.connection());

        let image = sample("VIS-1");
        repo.insert(&image, b"bytes").unwrap();

        repo.set_caption(&image.image_id, "North wall").unwrap();
        repo.set_drawings(&image.image_id, Some(b"compressed")).unwrap();

        let fetched = repo.get(&image.image_id).unwrap().unwrap();
        assert_eq!(fetched.caption, "North wall");
        assert!(fetched.has_drawings());
    }
}
