//! Identity resolution layer.
//!
//! Bidirectional temp-to-real id cache backed by the persisted
//! `identity_map` table. The rest of the system never assumes a single
//! moment at which "the" id for an entity is stable; during the
//! reconciliation window both forms are valid references and this layer
//! answers for either direction.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::db::{Db, IdentityRepository, SqliteIdentityRepository};
use crate::error::Result;
use crate::reactive::{ChangeBus, Table, TableChange};

#[derive(Default)]
struct Cache {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

/// Shared identity map handle.
#[derive(Clone)]
pub struct IdentityMap {
    db: Db,
    bus: ChangeBus,
    cache: Arc<RwLock<Cache>>,
}

impl IdentityMap {
    /// Create a handle and warm the cache from the persisted table.
    pub async fn load(db: Db, bus: ChangeBus) -> Result<Self> {
        let mappings = db
            .with(|db| SqliteIdentityRepository::new(db.connection()).all())
            .await?;

        let mut cache = Cache::default();
        for (temp_id, real_id) in mappings {
            cache.reverse.insert(real_id.clone(), temp_id.clone());
            cache.forward.insert(temp_id, real_id);
        }

        Ok(Self {
            db,
            bus,
            cache: Arc::new(RwLock::new(cache)),
        })
    }

    /// Record a confirmed mapping. Append-only within a session: a second
    /// mapping for the same temp id is ignored with a warning.
    pub async fn record(&self, temp_id: &str, real_id: &str) -> Result<()> {
        {
            let cache = self.cache.read().expect("identity cache poisoned");
            if let Some(existing) = cache.forward.get(temp_id) {
                if existing != real_id {
                    tracing::warn!(
                        temp_id,
                        existing,
                        rejected = real_id,
                        "Ignoring conflicting identity mapping"
                    );
                }
                return Ok(());
            }
        }

        self.db
            .with({
                let temp_id = temp_id.to_string();
                let real_id = real_id.to_string();
                move |db| {
                    SqliteIdentityRepository::new(db.connection()).insert(&temp_id, &real_id)
                }
            })
            .await?;

        {
            let mut cache = self.cache.write().expect("identity cache poisoned");
            cache.forward.insert(temp_id.to_string(), real_id.to_string());
            cache.reverse.insert(real_id.to_string(), temp_id.to_string());
        }

        self.bus.publish(TableChange {
            table: Table::Identity,
            service_id: None,
            keys: vec![temp_id.to_string(), real_id.to_string()],
        });
        Ok(())
    }

    /// Synchronous forward lookup from the in-memory cache.
    #[must_use]
    pub fn real_id(&self, temp_id: &str) -> Option<String> {
        self.cache
            .read()
            .expect("identity cache poisoned")
            .forward
            .get(temp_id)
            .cloned()
    }

    /// All known temp-to-real pairs, sorted by temp id.
    #[must_use]
    pub fn mappings(&self) -> Vec<(String, String)> {
        let cache = self.cache.read().expect("identity cache poisoned");
        let mut all: Vec<(String, String)> = cache
            .forward
            .iter()
            .map(|(temp, real)| (temp.clone(), real.clone()))
            .collect();
        all.sort();
        all
    }

    /// Synchronous reverse lookup from the in-memory cache.
    #[must_use]
    pub fn temp_id(&self, real_id: &str) -> Option<String> {
        self.cache
            .read()
            .expect("identity cache poisoned")
            .reverse
            .get(real_id)
            .cloned()
    }

    /// Forward lookup falling back to the persisted table on a cache miss.
    pub async fn real_id_or_db(&self, temp_id: &str) -> Result<Option<String>> {
        if let Some(id) = self.real_id(temp_id) {
            return Ok(Some(id));
        }
        let found = self
            .db
            .with({
                let temp_id = temp_id.to_string();
                move |db| SqliteIdentityRepository::new(db.connection()).real_id(&temp_id)
            })
            .await?;
        if let Some(real_id) = &found {
            let mut cache = self.cache.write().expect("identity cache poisoned");
            cache.forward.insert(temp_id.to_string(), real_id.clone());
            cache.reverse.insert(real_id.clone(), temp_id.to_string());
        }
        Ok(found)
    }

    /// All id forms currently valid for an entity: the id itself plus its
    /// mapped counterpart, in stable order. Used for union photo lookups.
    #[must_use]
    pub fn all_forms(&self, entity_id: &str) -> Vec<String> {
        let mut forms = vec![entity_id.to_string()];
        if let Some(real) = self.real_id(entity_id) {
            if real != entity_id {
                forms.push(real);
            }
        }
        if let Some(temp) = self.temp_id(entity_id) {
            if temp != entity_id {
                forms.push(temp);
            }
        }
        forms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> IdentityMap {
        let db = Db::open_in_memory().unwrap();
        IdentityMap::load(db, ChangeBus::default()).await.unwrap()
    }

    #[tokio::test]
    async fn record_and_lookup_both_directions() {
        let map = setup().await;
        map.record("temp_visual_a", "VIS-1").await.unwrap();

        assert_eq!(map.real_id("temp_visual_a"), Some("VIS-1".to_string()));
        assert_eq!(map.temp_id("VIS-1"), Some("temp_visual_a".to_string()));
        assert_eq!(map.real_id("temp_visual_x"), None);
    }

    #[tokio::test]
    async fn conflicting_record_keeps_first_mapping() {
        let map = setup().await;
        map.record("temp_visual_a", "VIS-1").await.unwrap();
        map.record("temp_visual_a", "VIS-2").await.unwrap();
        assert_eq!(map.real_id("temp_visual_a"), Some("VIS-1".to_string()));
    }

    #[tokio::test]
    async fn load_warms_cache_from_disk() {
        let db = Db::open_in_memory().unwrap();
        let bus = ChangeBus::default();
        let map = IdentityMap::load(db.clone(), bus.clone()).await.unwrap();
        map.record("temp_visual_a", "VIS-1").await.unwrap();

        // A second handle over the same database sees the mapping on load.
        let reloaded = IdentityMap::load(db, bus).await.unwrap();
        assert_eq!(reloaded.real_id("temp_visual_a"), Some("VIS-1".to_string()));
    }

    #[tokio::test]
    async fn all_forms_unions_mapped_counterparts() {
        let map = setup().await;
        map.record("temp_visual_a", "VIS-1").await.unwrap();

        assert_eq!(
            map.all_forms("temp_visual_a"),
            vec!["temp_visual_a".to_string(), "VIS-1".to_string()]
        );
        assert_eq!(
            map.all_forms("VIS-1"),
            vec!["VIS-1".to_string(), "temp_visual_a".to_string()]
        );
        assert_eq!(map.all_forms("VIS-99"), vec!["VIS-99".to_string()]);
    }

    #[tokio::test]
    async fn db_fallback_populates_cache() {
        let db = Db::open_in_memory().unwrap();
        let bus = ChangeBus::default();
        let map = IdentityMap::load(db.clone(), bus).await.unwrap();

        // Insert behind the cache's back.
        db.with(|db| SqliteIdentityRepository::new(db.connection()).insert("temp_visual_z", "VIS-9"))
            .await
            .unwrap();
        assert_eq!(map.real_id("temp_visual_z"), None);
        assert_eq!(
            map.real_id_or_db("temp_visual_z").await.unwrap(),
            Some("VIS-9".to_string())
        );
        // Now cached for the synchronous path.
        assert_eq!(map.temp_id("VIS-9"), Some("temp_visual_z".to_string()));
    }
}
