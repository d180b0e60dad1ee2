//! Background synchronization between the local stores and the remote API.

mod backoff;
mod synchronizer;

pub use backoff::BackoffPolicy;
pub use synchronizer::{DrainSummary, SyncOptions, Synchronizer};

use crate::models::ImageId;

/// Lifecycle notifications published while draining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A temp entity id was confirmed and mapped to its server id.
    IdRemapped { temp_id: String, real_id: String },
    /// A photo's owning entity moved from a temp id to the server id.
    UploadComplete {
        image_id: ImageId,
        old_entity_id: String,
        new_entity_id: String,
    },
    /// Remote-derived caches should be re-fetched; `None` means all services.
    CacheInvalidated { service_id: Option<String> },
}

/// Snapshot of the sync queue, published on a watch channel.
///
/// Consumers must defer destructive reloads while `is_syncing` is true and
/// re-schedule them for when it flips back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Whether a drain is currently in progress.
    pub is_syncing: bool,
    /// Requests waiting to go out (including in-flight ones).
    pub pending: usize,
    /// Requests rejected by the remote.
    pub failed: usize,
}
