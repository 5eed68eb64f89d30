//! Shared test helpers for files-manager unit tests.

use std::sync::{Arc, Mutex};

use crate::config::{AuthConfig, Config, NodeConfig, StorageConfig, UploadPolicy};
use crate::events::{EventPublisher, FileEvent};
use crate::lifecycle::LifecycleEngine;
use crate::object_store::LocalStore;
use crate::storage::Database;
use crate::AppState;

/// Publisher that keeps every event in memory.
#[derive(Default)]
pub struct TestPublisher {
    events: Mutex<Vec<FileEvent>>,
}

impl TestPublisher {
    pub fn events(&self) -> Vec<FileEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventPublisher for TestPublisher {
    fn publish(&self, event: FileEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Create a test AppState with a temporary database and local object store.
pub fn test_state(temp_dir: &tempfile::TempDir) -> (Arc<AppState>, Arc<TestPublisher>) {
    let data_dir = temp_dir.path().join("data");
    let files_dir = temp_dir.path().join("files");

    let config = Config {
        auth: AuthConfig {
            jwt_secret: "test-secret".to_string(),
        },
        events: None,
        node: NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
            public_url: "http://localhost:3004".to_string(),
        },
        storage: StorageConfig {
            local_storage_path: files_dir.to_string_lossy().to_string(),
            ..StorageConfig::default()
        },
        uploads: UploadPolicy {
            max_file_size_bytes: 10 * 1024 * 1024, // 10MB for tests
            ..UploadPolicy::default()
        },
        test_mode: true,
    };

    let db = Database::open(&data_dir).expect("Failed to open test database");
    let local_store = Arc::new(
        LocalStore::new(
            &files_dir,
            &config.node.public_url,
            &config.storage.local_signing_secret,
        )
        .expect("Failed to create test object store"),
    );
    let publisher = Arc::new(TestPublisher::default());

    let engine = LifecycleEngine::new(
        db.clone(),
        local_store.clone(),
        publisher.clone(),
        config.uploads.clone(),
    );

    let state = Arc::new(AppState {
        config,
        db,
        engine,
        local_store: Some(local_store),
    });
    (state, publisher)
}
