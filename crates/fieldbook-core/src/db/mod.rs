//! Database layer for fieldbook

mod connection;
mod field_repository;
mod identity_repository;
mod image_repository;
mod migrations;
mod outbox_repository;
mod service;

pub use connection::Database;
pub use field_repository::{FieldPatch, FieldRepository, SqliteFieldRepository};
pub use identity_repository::{IdentityRepository, SqliteIdentityRepository};
pub use image_repository::{ImageRepository, SqliteImageRepository};
pub use outbox_repository::{OutboxCounts, OutboxRepository, SqliteOutboxRepository};
pub use service::Db;
