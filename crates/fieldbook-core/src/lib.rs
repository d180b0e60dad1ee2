//! fieldbook-core - Core library for Fieldbook
//!
//! Offline-first engine for field inspections: local field and photo stores,
//! a durable outbox, a background synchronizer that resolves temporary
//! identities against the remote, and the category detail view-model.

pub mod annotate;
pub mod capture;
pub mod db;
pub mod error;
pub mod identity;
pub mod models;
pub mod reactive;
pub mod remote;
pub mod stores;
pub mod sync;
pub mod timer;
pub mod util;
pub mod viewmodel;

pub use error::{Error, Result};
pub use models::{ImageId, LocalImage, PendingRequest, VisualField};
