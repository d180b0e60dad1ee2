//! Change notification bus for the local stores.
//!
//! Every write to a local table publishes a [`TableChange`]; subscribers
//! filter by table and key predicate, then re-query the store. Subscriptions
//! can be dropped and re-established freely because all state lives in the
//! database, not in the channel.

use tokio::sync::broadcast;

/// Local tables that emit change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Fields,
    Images,
    Outbox,
    Identity,
}

/// A batch of rows changed in one table.
#[derive(Debug, Clone)]
pub struct TableChange {
    /// Table the change happened in.
    pub table: Table,
    /// Owning service, when the write is service-scoped.
    pub service_id: Option<String>,
    /// Primary keys of the changed rows.
    pub keys: Vec<String>,
}

impl TableChange {
    /// Whether this change touches the given service (or is global).
    #[must_use]
    pub fn touches_service(&self, service_id: &str) -> bool {
        self.service_id
            .as_deref()
            .is_none_or(|id| id == service_id)
    }
}

/// Broadcast bus shared by all stores of one database.
#[derive(Debug, Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<TableChange>,
}

impl ChangeBus {
    /// Create a bus with room for `capacity` in-flight notifications.
    ///
    /// Slow subscribers that fall more than `capacity` behind observe a
    /// `Lagged` error and should re-query the store from scratch.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a change. Lack of subscribers is not an error.
    pub fn publish(&self, change: TableChange) {
        let _ = self.tx.send(change);
    }

    /// Publish a change for a set of keys in a service-scoped table.
    pub fn publish_keys(&self, table: Table, service_id: &str, keys: Vec<String>) {
        self.publish(TableChange {
            table,
            service_id: Some(service_id.to_string()),
            keys,
        });
    }

    /// Subscribe to all subsequent changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TableChange> {
        self.tx.subscribe()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = ChangeBus::default();
        let mut rx = bus.subscribe();
        bus.publish_keys(Table::Fields, "svc", vec!["7".to_string()]);

        let change = rx.recv().await.unwrap();
        assert_eq!(change.table, Table::Fields);
        assert!(change.touches_service("svc"));
        assert!(!change.touches_service("other"));
        assert_eq!(change.keys, vec!["7".to_string()]);
    }

    #[tokio::test]
    async fn resubscribe_sees_later_changes() {
        let bus = ChangeBus::default();
        let rx = bus.subscribe();
        drop(rx);

        let mut rx = bus.subscribe();
        bus.publish(TableChange {
            table: Table::Images,
            service_id: None,
            keys: vec![],
        });
        let change = rx.recv().await.unwrap();
        assert_eq!(change.table, Table::Images);
        assert!(change.touches_service("anything"));
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = ChangeBus::new(4);
        bus.publish_keys(Table::Outbox, "svc", vec![]);
    }
}
