use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::state_machine::FileStatus;

/// A file record stored in redb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    // Fixed at creation
    pub id: String,
    pub owner_id: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub object_key: String,
    pub created_at: DateTime<Utc>,

    // Mutable
    pub status: FileStatus,
    #[serde(default)]
    pub project_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_ready(&self) -> bool {
        self.status == FileStatus::Ready
    }

    pub fn is_deleted(&self) -> bool {
        self.status == FileStatus::Deleted
    }
}

/// Input for [`Database::create_file`](super::Database::create_file).
///
/// `size_bytes` is signed so a negative size from the wire is rejected by the
/// store rather than silently wrapped.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub id: String,
    pub owner_id: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub object_key: String,
}

/// Result of a status transition: the stored record and whether this call
/// changed it.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub file: FileRecord,
    pub changed: bool,
}
