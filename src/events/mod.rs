//! Lifecycle notifications.
//!
//! Publishing is fire-and-forget: implementations must return immediately
//! and absorb every failure, so a broker outage can never fail or roll back a
//! file transition.

mod rabbitmq;

pub use rabbitmq::{RabbitMqConfig, RabbitMqPublisher};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::models::FileRecord;

/// Emitted once a file leaves `PENDING`. The notifications consumer filters
/// on this exact name.
pub const FILE_READY: &str = "project.file.ready";

/// Older routing key still bound for producers that publish it.
pub const LEGACY_FILE_READY: &str = "file.ready";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEvent {
    pub event: String,
    pub file_id: String,
    pub owner_id: String,
    /// Recipient of the notification; the consumer reads this key
    pub user_id: String,
    pub project_id: Option<i64>,
    pub object_key: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub occurred_at: DateTime<Utc>,
}

impl FileEvent {
    pub fn ready(file: &FileRecord) -> Self {
        Self {
            event: FILE_READY.to_string(),
            file_id: file.id.clone(),
            owner_id: file.owner_id.clone(),
            user_id: file.owner_id.clone(),
            project_id: file.project_id,
            object_key: file.object_key.clone(),
            original_name: file.original_name.clone(),
            content_type: file.content_type.clone(),
            size_bytes: file.size_bytes,
            occurred_at: Utc::now(),
        }
    }
}

pub trait EventPublisher: Send + Sync {
    /// Hand off an event. Never blocks on the broker and never fails.
    fn publish(&self, event: FileEvent);

    /// Events that could not be delivered since startup.
    fn failures(&self) -> u64 {
        0
    }
}

/// Publisher used when no broker is configured.
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, event: FileEvent) {
        tracing::debug!(
            event = %event.event,
            file_id = %event.file_id,
            "No broker configured, dropping event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::FileStatus;

    fn ready_record() -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: "f-1".to_string(),
            owner_id: "u1".to_string(),
            original_name: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 100,
            object_key: "users/u1/f-1".to_string(),
            created_at: now,
            status: FileStatus::Ready,
            project_id: Some(7),
            updated_at: now,
        }
    }

    #[test]
    fn ready_event_matches_consumer_contract() {
        let value = serde_json::to_value(FileEvent::ready(&ready_record())).unwrap();

        assert_eq!(value["event"], "project.file.ready");
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["ownerId"], "u1");
        assert_eq!(value["fileId"], "f-1");
        assert_eq!(value["projectId"], 7);
        assert_eq!(value["objectKey"], "users/u1/f-1");
        assert_eq!(value["originalName"], "report.pdf");
        assert_eq!(value["contentType"], "application/pdf");
        assert_eq!(value["sizeBytes"], 100);
        assert!(value["occurredAt"].is_string());
        assert_eq!(value.as_object().unwrap().len(), 10);
    }
}
