//! The file lifecycle engine.
//!
//! Checks preconditions and ownership, then hands each transition to the
//! store, whose write transactions are the only serialization point. No lock
//! is held while talking to object storage or the broker.

use std::sync::Arc;

use thiserror::Error;

use crate::config::UploadPolicy;
use crate::events::{EventPublisher, FileEvent};
use crate::object_store::{self, ObjectStoreError, UploadDelegate};
use crate::storage::models::{FileRecord, FileStatus, NewFile};
use crate::storage::{Database, DatabaseError};

const MAX_NAME_LEN: usize = 255;
const MAX_CONTENT_TYPE_LEN: usize = 120;
const GENERIC_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Validation(String),
    #[error("File of {size} bytes exceeds the maximum upload size of {max} bytes")]
    PayloadTooLarge { size: i64, max: u64 },
    #[error("Unsupported content type: {0}")]
    UnsupportedMediaType(String),
    #[error("File not found")]
    NotFound,
    #[error("Forbidden")]
    Forbidden,
    #[error("{0}")]
    InvalidState(String),
    #[error("Object storage unavailable: {0}")]
    Dependency(#[from] ObjectStoreError),
    #[error("Storage error: {0}")]
    Storage(DatabaseError),
}

impl From<DatabaseError> for LifecycleError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Validation(message) => LifecycleError::Validation(message),
            DatabaseError::InvalidTransition(t) => LifecycleError::InvalidState(t.to_string()),
            other => LifecycleError::Storage(other),
        }
    }
}

/// A freshly created `PENDING` file and the URL its bytes should be sent to.
#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub file: FileRecord,
    pub upload_url: String,
    pub expires_in_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct DownloadTicket {
    pub file: FileRecord,
    pub download_url: String,
    pub expires_in_seconds: u64,
}

pub struct LifecycleEngine {
    db: Database,
    delegate: Arc<dyn UploadDelegate>,
    publisher: Arc<dyn EventPublisher>,
    policy: UploadPolicy,
}

impl LifecycleEngine {
    pub fn new(
        db: Database,
        delegate: Arc<dyn UploadDelegate>,
        publisher: Arc<dyn EventPublisher>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            db,
            delegate,
            publisher,
            policy,
        }
    }

    pub fn publisher_failures(&self) -> u64 {
        self.publisher.failures()
    }

    /// A file that exists and has not been deleted.
    fn live_file(&self, file_id: &str) -> Result<FileRecord, LifecycleError> {
        self.db
            .get_file(file_id)?
            .filter(|file| !file.is_deleted())
            .ok_or(LifecycleError::NotFound)
    }

    /// Register a new `PENDING` file and issue a write URL for its bytes.
    pub async fn init_upload(
        &self,
        owner_id: &str,
        original_name: &str,
        content_type: &str,
        size_bytes: i64,
    ) -> Result<UploadTicket, LifecycleError> {
        // The name is kept exactly as sent; content types are MIME tokens and
        // are stored trimmed.
        let content_type = content_type.trim();

        if owner_id.is_empty() {
            return Err(LifecycleError::Validation("owner must not be empty".into()));
        }
        if original_name.trim().is_empty() || original_name.chars().count() > MAX_NAME_LEN {
            return Err(LifecycleError::Validation(format!(
                "originalName must be between 1 and {MAX_NAME_LEN} characters"
            )));
        }
        if content_type.is_empty() || content_type.chars().count() > MAX_CONTENT_TYPE_LEN {
            return Err(LifecycleError::Validation(format!(
                "contentType must be between 1 and {MAX_CONTENT_TYPE_LEN} characters"
            )));
        }
        if size_bytes < 0 {
            return Err(LifecycleError::Validation(
                "sizeBytes must not be negative".into(),
            ));
        }
        if size_bytes as u64 > self.policy.max_file_size_bytes {
            return Err(LifecycleError::PayloadTooLarge {
                size: size_bytes,
                max: self.policy.max_file_size_bytes,
            });
        }

        // Refine a generic content type from the file name, when possible
        let content_type = if content_type == GENERIC_CONTENT_TYPE {
            mime_guess::from_path(original_name.trim())
                .first()
                .map(|m| m.to_string())
                .unwrap_or_else(|| content_type.to_string())
        } else {
            content_type.to_string()
        };

        if !self.policy.allows(&content_type) {
            return Err(LifecycleError::UnsupportedMediaType(content_type));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let key = object_store::object_key(owner_id, &id);

        let file = self.db.create_file(&NewFile {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            original_name: original_name.to_string(),
            content_type: content_type.clone(),
            size_bytes,
            object_key: key.clone(),
        })?;

        let ttl = self.policy.presigned_expires_seconds;
        let upload_url = match self
            .delegate
            .issue_write_handle(&key, &content_type, ttl)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                // No handle means the record can never complete; retire it.
                if let Err(cleanup) = self.db.mark_deleted(&id) {
                    tracing::warn!(file_id = %id, error = %cleanup, "Failed to retire orphaned upload");
                }
                return Err(e.into());
            }
        };

        tracing::debug!(file_id = %id, owner_id = %owner_id, object_key = %key, "Initiated upload");

        Ok(UploadTicket {
            file,
            upload_url,
            expires_in_seconds: ttl,
        })
    }

    /// Confirm the bytes were transferred. Repeating the call on a `READY`
    /// file succeeds without emitting a second event.
    pub async fn complete_upload(
        &self,
        file_id: &str,
        caller_id: &str,
    ) -> Result<FileRecord, LifecycleError> {
        let file = self.live_file(file_id)?;
        if file.owner_id != caller_id {
            return Err(LifecycleError::Forbidden);
        }

        let change = match self.db.mark_ready(file_id) {
            Ok(Some(change)) => change,
            // Deleted between the read above and the write
            Ok(None) | Err(DatabaseError::InvalidTransition(_)) => {
                return Err(LifecycleError::NotFound)
            }
            Err(e) => return Err(e.into()),
        };

        if change.changed {
            tracing::info!(file_id = %file_id, owner_id = %caller_id, "File ready");
            self.publisher.publish(FileEvent::ready(&change.file));
        }

        Ok(change.file)
    }

    /// Link a `READY` file to a project. Whatever file held the project before
    /// loses it in the same transaction; the last committed attach wins.
    pub async fn attach_to_project(
        &self,
        file_id: &str,
        project_id: i64,
        caller_id: &str,
    ) -> Result<FileRecord, LifecycleError> {
        let file = self.db.get_file(file_id)?.ok_or(LifecycleError::NotFound)?;
        if !file.is_ready() {
            return Err(LifecycleError::InvalidState(format!(
                "File must be READY to attach (currently {})",
                file.status
            )));
        }
        if file.owner_id != caller_id {
            return Err(LifecycleError::Forbidden);
        }

        let file = self
            .db
            .reassign_project(file_id, project_id)?
            .ok_or(LifecycleError::NotFound)?;

        tracing::debug!(file_id = %file_id, project_id, "Attached file to project");
        Ok(file)
    }

    /// Issue a read URL. Any authenticated caller may download a `READY`
    /// file; other states have no readable object and report not found.
    pub async fn request_download(
        &self,
        file_id: &str,
        caller_id: &str,
    ) -> Result<DownloadTicket, LifecycleError> {
        let file = self
            .db
            .get_file(file_id)?
            .filter(|file| file.is_ready())
            .ok_or(LifecycleError::NotFound)?;

        let ttl = self.policy.presigned_expires_seconds;
        let download_url = self
            .delegate
            .issue_read_handle(&file.object_key, ttl)
            .await?;

        tracing::debug!(file_id = %file_id, caller_id = %caller_id, "Issued download URL");
        Ok(DownloadTicket {
            file,
            download_url,
            expires_in_seconds: ttl,
        })
    }

    /// Remove the backing object, then mark the record `DELETED`. The record
    /// is marked even when object removal fails; leaked objects are left for
    /// external cleanup.
    pub async fn delete_file(&self, file_id: &str, caller_id: &str) -> Result<(), LifecycleError> {
        let file = self.live_file(file_id)?;
        if file.owner_id != caller_id {
            return Err(LifecycleError::Forbidden);
        }

        if let Err(e) = self.delegate.remove_object(&file.object_key).await {
            tracing::warn!(
                file_id = %file_id,
                object_key = %file.object_key,
                error = %e,
                "Failed to remove object from storage"
            );
        }

        match self.db.mark_deleted(file_id) {
            Ok(Some(_)) => {}
            Ok(None) | Err(DatabaseError::InvalidTransition(_)) => {
                return Err(LifecycleError::NotFound)
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(file_id = %file_id, "Deleted file");
        Ok(())
    }

    /// Id of the `READY` file attached to a project, if any.
    pub fn lookup_project_file(&self, project_id: i64) -> Result<Option<String>, LifecycleError> {
        Ok(self
            .db
            .get_ready_file_for_project(project_id)?
            .map(|file| file.id))
    }

    pub fn get_file(&self, file_id: &str) -> Result<FileRecord, LifecycleError> {
        self.live_file(file_id)
    }

    pub fn list_owner_files(
        &self,
        owner_id: &str,
        status: Option<FileStatus>,
    ) -> Result<Vec<FileRecord>, LifecycleError> {
        Ok(self.db.list_files_by_owner(owner_id, status)?)
    }
}
