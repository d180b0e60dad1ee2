pub mod common;
pub mod fields;
pub mod outbox;
pub mod photos;
pub mod status;
pub mod sync;
