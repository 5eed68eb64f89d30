//! files-manager - ownership and lifecycle broker for user-uploaded files
//!
//! File bytes live in external object storage; this crate keeps the record of
//! each file and moves it through its lifecycle:
//! - PENDING -> READY -> DELETED state machine enforced at the storage layer
//! - At most one file attached to a project, swapped atomically
//! - Presigned upload/download URLs (S3-compatible or local signed URLs)
//! - Best-effort lifecycle events to RabbitMQ
//! - redb embedded database for metadata (ACID, MVCC, crash-safe)

pub mod api;
pub mod auth;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod object_store;
pub mod state_machine;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use config::Config;
use lifecycle::LifecycleEngine;
use object_store::LocalStore;
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub engine: LifecycleEngine,
    /// Set when the local backend serves signed URLs itself
    pub local_store: Option<Arc<LocalStore>>,
}
