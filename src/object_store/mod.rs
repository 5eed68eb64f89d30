mod local;
mod s3;
mod sigv4;

pub use local::{LocalStore, ObjectOperation};
pub use s3::{S3Config, S3Store};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Derive the storage location of a file. Other tooling (cleanup jobs,
/// audits) relies on this layout to recover the owner from the key alone.
pub fn object_key(owner_id: &str, file_id: &str) -> String {
    format!("users/{owner_id}/{file_id}")
}

/// Issues time-limited URLs against object storage. File bytes never pass
/// through the lifecycle engine; clients move them with these URLs.
#[async_trait]
pub trait UploadDelegate: Send + Sync {
    /// URL the client may `PUT` the object's bytes to with `content_type`.
    async fn issue_write_handle(
        &self,
        key: &str,
        content_type: &str,
        ttl_seconds: u64,
    ) -> Result<String, ObjectStoreError>;

    /// URL the client may `GET` the object's bytes from.
    async fn issue_read_handle(&self, key: &str, ttl_seconds: u64)
        -> Result<String, ObjectStoreError>;

    /// Remove the object. A missing object is not an error.
    async fn remove_object(&self, key: &str) -> Result<(), ObjectStoreError>;
}
