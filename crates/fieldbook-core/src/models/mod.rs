//! Data models for fieldbook-core

mod local_image;
mod pending_request;
mod template;
mod visual_field;

pub use local_image::{BlobId, ImageId, ImageStatus, LocalImage};
pub use pending_request::{PendingRequest, RequestId, RequestOp, RequestStatus};
pub use template::InspectionTemplate;
pub use visual_field::{TempVisualId, VisualField, VisualId, VisualKind, TEMP_VISUAL_PREFIX};
