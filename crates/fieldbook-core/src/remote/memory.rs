//! In-memory remote record store.
//!
//! Used by tests and the CLI's offline demo mode. Supports failure injection
//! so sync retry behavior can be exercised deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::RemoteApi;
use crate::error::{Error, Result};

/// In-memory [`RemoteApi`] implementation.
#[derive(Default)]
pub struct MemoryRemote {
    tables: Mutex<HashMap<String, Vec<(String, serde_json::Value)>>>,
    next_id: AtomicU64,
    offline: AtomicBool,
    fail_next: AtomicUsize,
    fail_retryable: AtomicBool,
}

impl MemoryRemote {
    /// Create an empty, reachable remote.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing or regaining connectivity. While offline, every call
    /// fails with a retryable error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `count` calls fail. `retryable` selects between a
    /// network-style failure and a validation-style rejection.
    pub fn fail_next(&self, count: usize, retryable: bool) {
        self.fail_next.store(count, Ordering::SeqCst);
        self.fail_retryable.store(retryable, Ordering::SeqCst);
    }

    /// Snapshot of a table's records, in creation order.
    #[must_use]
    pub fn records(&self, table: &str) -> Vec<(String, serde_json::Value)> {
        self.tables
            .lock()
            .expect("memory remote lock poisoned")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn gate(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::remote_retryable("Network unreachable"));
        }
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return if self.fail_retryable.load(Ordering::SeqCst) {
                Err(Error::remote_retryable("Injected transient failure"))
            } else {
                Err(Error::remote_rejected("Injected validation rejection"))
            };
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn create(&self, table: &str, payload: &serde_json::Value) -> Result<String> {
        self.gate()?;
        let id = format!("R-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.tables
            .lock()
            .expect("memory remote lock poisoned")
            .entry(table.to_string())
            .or_default()
            .push((id.clone(), payload.clone()));
        Ok(id)
    }

    async fn update(
        &self,
        table: &str,
        record_id: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        self.gate()?;
        let mut tables = self.tables.lock().expect("memory remote lock poisoned");
        let records = tables
            .get_mut(table)
            .ok_or_else(|| Error::remote_rejected(format!("No such table: {table}")))?;
        let record = records
            .iter_mut()
            .find(|(id, _)| id == record_id)
            .ok_or_else(|| Error::remote_rejected(format!("No such record: {record_id}")))?;

        if let (Some(existing), Some(updates)) = (record.1.as_object_mut(), payload.as_object()) {
            for (key, value) in updates {
                existing.insert(key.clone(), value.clone());
            }
        } else {
            record.1 = payload.clone();
        }
        Ok(())
    }

    async fn delete(&self, table: &str, record_id: &str) -> Result<()> {
        self.gate()?;
        let mut tables = self.tables.lock().expect("memory remote lock poisoned");
        if let Some(records) = tables.get_mut(table) {
            records.retain(|(id, _)| id != record_id);
        }
        Ok(())
    }

    async fn signed_file_url(&self, key: &str) -> Result<String> {
        self.gate()?;
        Ok(format!("https://files.example.test/signed/{key}"))
    }

    async fn list(
        &self,
        table: &str,
        filter: &serde_json::Value,
    ) -> Result<Vec<serde_json::Value>> {
        self.gate()?;
        let tables = self.tables.lock().expect("memory remote lock poisoned");
        let Some(records) = tables.get(table) else {
            return Ok(Vec::new());
        };

        let filter = filter.as_object();
        let matches = |record: &serde_json::Value| -> bool {
            filter.is_none_or(|wanted| {
                wanted
                    .iter()
                    .all(|(key, value)| record.get(key) == Some(value))
            })
        };

        Ok(records
            .iter()
            .filter(|(_, record)| matches(record))
            .map(|(id, record)| {
                let mut with_id = record.clone();
                if let Some(obj) = with_id.as_object_mut() {
                    obj.insert("VisualID".to_string(), serde_json::Value::String(id.clone()));
                }
                with_id
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_list_update_delete() {
        let remote = MemoryRemote::new();
        let id = remote
            .create("visuals", &json!({"Category": "Roof"}))
            .await
            .unwrap();

        let listed = remote
            .list("visuals", &json!({"Category": "Roof"}))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].get("VisualID").unwrap(), &json!(id));

        remote
            .update("visuals", &id, &json!({"Answers": "Severe"}))
            .await
            .unwrap();
        let records = remote.records("visuals");
        assert_eq!(records[0].1.get("Answers").unwrap(), &json!("Severe"));
        assert_eq!(records[0].1.get("Category").unwrap(), &json!("Roof"));

        remote.delete("visuals", &id).await.unwrap();
        assert!(remote.records("visuals").is_empty());
    }

    #[tokio::test]
    async fn offline_mode_fails_retryable() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        let error = remote.create("visuals", &json!({})).await.unwrap_err();
        assert!(error.is_retryable());

        remote.set_offline(false);
        assert!(remote.create("visuals", &json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn failure_injection_is_counted() {
        let remote = MemoryRemote::new();
        remote.fail_next(2, false);

        assert!(!remote
            .create("visuals", &json!({}))
            .await
            .unwrap_err()
            .is_retryable());
        assert!(remote.create("visuals", &json!({})).await.is_err());
        assert!(remote.create("visuals", &json!({})).await.is_ok());
    }
}
