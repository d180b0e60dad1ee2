//! Offline-first stores over the local database.
//!
//! Every mutation lands locally first and is announced on the change bus;
//! remote effects go through the outbox, never directly from a store.

mod field_store;
mod image_store;
mod outbox;

pub use field_store::{FieldStore, FieldWatch, VISUALS_TABLE};
pub use image_store::{ImageStore, ATTACH_TABLE, PLACEHOLDER_URL};
pub use outbox::Outbox;
