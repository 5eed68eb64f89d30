mod admin;
mod files;
mod local_objects;

use crate::api::response::ApiError;
use crate::lifecycle::LifecycleError;

pub use admin::{admin_purge, health};
pub use files::{
    attach_to_project, complete_upload, delete_file, file_by_project, get_file, init_upload,
    list_files, request_download,
};
pub use local_objects::{read_object, write_object};

/// Map a LifecycleError to an ApiError
impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Validation(message) => ApiError::bad_request(message),
            LifecycleError::PayloadTooLarge { .. } => ApiError::payload_too_large(e.to_string()),
            LifecycleError::UnsupportedMediaType(_) => {
                ApiError::unsupported_media_type(e.to_string())
            }
            LifecycleError::NotFound => ApiError::not_found("File not found"),
            LifecycleError::Forbidden => ApiError::forbidden("Forbidden"),
            LifecycleError::InvalidState(message) => ApiError::conflict(message),
            LifecycleError::Dependency(err) => {
                tracing::error!(error = %err, "Object storage request failed");
                ApiError::bad_gateway("Object storage unavailable")
            }
            LifecycleError::Storage(err) => ApiError::internal(err.to_string()),
        }
    }
}
