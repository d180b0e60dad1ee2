//! Page-facing view-models over the stores.

mod category_detail;
mod photos;
pub(crate) mod reconcile;

pub use category_detail::{CategoryDetailViewModel, CategoryItem};
pub use photos::{is_local_source, PhotoEntry, PhotoList};
pub use reconcile::{reconcile_items, ReconcileReport};
