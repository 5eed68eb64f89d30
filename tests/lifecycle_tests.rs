use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use files_manager::config::UploadPolicy;
use files_manager::events::{EventPublisher, FileEvent, FILE_READY};
use files_manager::lifecycle::{LifecycleEngine, LifecycleError};
use files_manager::object_store::{LocalStore, ObjectStoreError, UploadDelegate};
use files_manager::storage::models::FileStatus;
use files_manager::storage::Database;

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<FileEvent>>,
}

impl RecordingPublisher {
    fn events(&self) -> Vec<FileEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: FileEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Object storage that is always down. Remembers the keys it was asked to
/// sign.
#[derive(Default)]
struct UnavailableStorage {
    write_keys: Mutex<Vec<String>>,
}

#[async_trait]
impl UploadDelegate for UnavailableStorage {
    async fn issue_write_handle(
        &self,
        key: &str,
        _content_type: &str,
        _ttl_seconds: u64,
    ) -> Result<String, ObjectStoreError> {
        self.write_keys.lock().unwrap().push(key.to_string());
        Err(ObjectStoreError::Backend("connection refused".to_string()))
    }

    async fn issue_read_handle(
        &self,
        _key: &str,
        _ttl_seconds: u64,
    ) -> Result<String, ObjectStoreError> {
        Err(ObjectStoreError::Backend("connection refused".to_string()))
    }

    async fn remove_object(&self, _key: &str) -> Result<(), ObjectStoreError> {
        Err(ObjectStoreError::Backend("connection refused".to_string()))
    }
}

/// Working object storage that records what the record looked like when each
/// object was removed.
struct ObservingStorage {
    db: Database,
    removed: Mutex<Vec<(String, Option<FileStatus>)>>,
}

#[async_trait]
impl UploadDelegate for ObservingStorage {
    async fn issue_write_handle(
        &self,
        key: &str,
        _content_type: &str,
        _ttl_seconds: u64,
    ) -> Result<String, ObjectStoreError> {
        Ok(format!("https://objects.test/{key}?op=write"))
    }

    async fn issue_read_handle(
        &self,
        key: &str,
        _ttl_seconds: u64,
    ) -> Result<String, ObjectStoreError> {
        Ok(format!("https://objects.test/{key}?op=read"))
    }

    async fn remove_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        let file_id = key.rsplit('/').next().unwrap_or_default();
        let status = self
            .db
            .get_file(file_id)
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?
            .map(|f| f.status);
        self.removed.lock().unwrap().push((key.to_string(), status));
        Ok(())
    }
}

struct Harness {
    dir: tempfile::TempDir,
    db: Database,
    engine: Arc<LifecycleEngine>,
    publisher: Arc<RecordingPublisher>,
}

fn harness_with(delegate: Option<Arc<dyn UploadDelegate>>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    let delegate: Arc<dyn UploadDelegate> = match delegate {
        Some(delegate) => delegate,
        None => Arc::new(
            LocalStore::new(
                dir.path().join("objects"),
                "http://localhost:3004",
                "local-secret",
            )
            .unwrap(),
        ),
    };
    let publisher = Arc::new(RecordingPublisher::default());
    let policy = UploadPolicy {
        max_file_size_bytes: 1024 * 1024,
        ..UploadPolicy::default()
    };
    let engine = Arc::new(LifecycleEngine::new(
        db.clone(),
        delegate,
        publisher.clone(),
        policy,
    ));
    Harness {
        dir,
        db,
        engine,
        publisher,
    }
}

fn harness() -> Harness {
    harness_with(None)
}

impl Harness {
    async fn pending(&self, owner: &str) -> String {
        self.engine
            .init_upload(owner, "report.pdf", "application/pdf", 512)
            .await
            .unwrap()
            .file
            .id
    }

    async fn ready(&self, owner: &str) -> String {
        let id = self.pending(owner).await;
        self.engine.complete_upload(&id, owner).await.unwrap();
        id
    }
}

// ============================================================================
// init_upload
// ============================================================================

#[tokio::test]
async fn test_init_upload_creates_pending_file() {
    let h = harness();
    let ticket = h
        .engine
        .init_upload("42", "report.pdf", "application/pdf", 512)
        .await
        .unwrap();

    assert_eq!(ticket.file.status, FileStatus::Pending);
    assert_eq!(ticket.file.owner_id, "42");
    assert_eq!(ticket.file.size_bytes, 512);
    assert_eq!(ticket.file.project_id, None);
    assert_eq!(
        ticket.file.object_key,
        format!("users/42/{}", ticket.file.id)
    );
    assert_eq!(ticket.expires_in_seconds, 900);
    assert!(ticket.upload_url.contains("/_local/objects/users/42/"));
    assert!(ticket.upload_url.contains("op=write"));

    let stored = h.db.get_file(&ticket.file.id).unwrap().unwrap();
    assert_eq!(stored, ticket.file);
}

#[tokio::test]
async fn test_object_keys_are_unique() {
    let h = harness();
    let mut keys = HashSet::new();
    for _ in 0..20 {
        let ticket = h
            .engine
            .init_upload("42", "same-name.pdf", "application/pdf", 1)
            .await
            .unwrap();
        assert!(keys.insert(ticket.file.object_key));
    }
}

#[tokio::test]
async fn test_init_upload_validation() {
    let h = harness();

    let cases = [
        ("", "application/pdf", 1),
        ("   ", "application/pdf", 1),
        ("report.pdf", "", 1),
        ("report.pdf", "application/pdf", -1),
    ];
    for (name, content_type, size) in cases {
        let result = h.engine.init_upload("42", name, content_type, size).await;
        assert!(
            matches!(result, Err(LifecycleError::Validation(_))),
            "{name:?} / {content_type:?} / {size} should be rejected"
        );
    }

    let long_name = "a".repeat(256);
    assert!(matches!(
        h.engine
            .init_upload("42", &long_name, "application/pdf", 1)
            .await,
        Err(LifecycleError::Validation(_))
    ));

    assert!(h.engine.list_owner_files("42", None).unwrap().is_empty());
}

#[tokio::test]
async fn test_init_upload_keeps_name_as_sent() {
    let h = harness();
    let ticket = h
        .engine
        .init_upload("42", "  Quarterly report.pdf ", " application/pdf ", 10)
        .await
        .unwrap();

    assert_eq!(ticket.file.original_name, "  Quarterly report.pdf ");
    // Content types are MIME tokens and are stored normalised
    assert_eq!(ticket.file.content_type, "application/pdf");

    let stored = h.db.get_file(&ticket.file.id).unwrap().unwrap();
    assert_eq!(stored.original_name, "  Quarterly report.pdf ");
}

#[tokio::test]
async fn test_init_upload_size_limit() {
    let h = harness();

    let at_limit = h
        .engine
        .init_upload("42", "big.pdf", "application/pdf", 1024 * 1024)
        .await;
    assert!(at_limit.is_ok());

    let over = h
        .engine
        .init_upload("42", "bigger.pdf", "application/pdf", 1024 * 1024 + 1)
        .await;
    assert!(matches!(
        over,
        Err(LifecycleError::PayloadTooLarge { .. })
    ));
}

#[tokio::test]
async fn test_init_upload_content_type_policy() {
    let h = harness();

    let result = h
        .engine
        .init_upload("42", "movie.mp4", "video/mp4", 10)
        .await;
    assert!(matches!(
        result,
        Err(LifecycleError::UnsupportedMediaType(_))
    ));

    // A generic type is refined from the file name before the check
    let ticket = h
        .engine
        .init_upload("42", "bundle.zip", "application/octet-stream", 10)
        .await
        .unwrap();
    assert_eq!(ticket.file.content_type, "application/zip");

    let unknown = h
        .engine
        .init_upload("42", "blob", "application/octet-stream", 10)
        .await;
    assert!(matches!(
        unknown,
        Err(LifecycleError::UnsupportedMediaType(_))
    ));
}

#[tokio::test]
async fn test_init_upload_storage_outage_retires_record() {
    let storage = Arc::new(UnavailableStorage::default());
    let delegate: Arc<dyn UploadDelegate> = storage.clone();
    let h = harness_with(Some(delegate));

    let result = h
        .engine
        .init_upload("42", "report.pdf", "application/pdf", 10)
        .await;
    assert!(matches!(result, Err(LifecycleError::Dependency(_))));

    let keys = storage.write_keys.lock().unwrap().clone();
    assert_eq!(keys.len(), 1);
    let file_id = keys[0].strip_prefix("users/42/").unwrap();
    let file = h.db.get_file(file_id).unwrap().unwrap();
    assert_eq!(file.status, FileStatus::Deleted);
    assert!(h.engine.list_owner_files("42", None).unwrap().is_empty());
}

// ============================================================================
// complete_upload
// ============================================================================

#[tokio::test]
async fn test_complete_upload_emits_one_event() {
    let h = harness();
    let id = h.pending("42").await;

    let first = h.engine.complete_upload(&id, "42").await.unwrap();
    assert_eq!(first.status, FileStatus::Ready);

    let second = h.engine.complete_upload(&id, "42").await.unwrap();
    assert_eq!(second.status, FileStatus::Ready);

    let events = h.publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, FILE_READY);
    assert_eq!(events[0].file_id, id);
    assert_eq!(events[0].owner_id, "42");
}

#[tokio::test]
async fn test_complete_upload_requires_owner() {
    let h = harness();
    let id = h.pending("42").await;

    let result = h.engine.complete_upload(&id, "7").await;
    assert!(matches!(result, Err(LifecycleError::Forbidden)));

    assert_eq!(h.db.get_file(&id).unwrap().unwrap().status, FileStatus::Pending);
    assert!(h.publisher.events().is_empty());
}

#[tokio::test]
async fn test_complete_upload_unknown_or_deleted() {
    let h = harness();
    assert!(matches!(
        h.engine.complete_upload("missing", "42").await,
        Err(LifecycleError::NotFound)
    ));

    let id = h.pending("42").await;
    h.engine.delete_file(&id, "42").await.unwrap();
    assert!(matches!(
        h.engine.complete_upload(&id, "42").await,
        Err(LifecycleError::NotFound)
    ));
    assert!(h.publisher.events().is_empty());
}

// ============================================================================
// attach_to_project
// ============================================================================

#[tokio::test]
async fn test_attach_requires_ready() {
    let h = harness();
    let id = h.pending("42").await;

    let result = h.engine.attach_to_project(&id, 1, "42").await;
    assert!(matches!(result, Err(LifecycleError::InvalidState(_))));
    assert_eq!(h.engine.lookup_project_file(1).unwrap(), None);
}

#[tokio::test]
async fn test_attach_deleted_file_is_invalid_state() {
    let h = harness();
    let id = h.ready("42").await;
    h.engine.delete_file(&id, "42").await.unwrap();

    let result = h.engine.attach_to_project(&id, 1, "42").await;
    assert!(matches!(result, Err(LifecycleError::InvalidState(_))));
}

#[tokio::test]
async fn test_attach_requires_owner() {
    let h = harness();
    let id = h.ready("42").await;

    let result = h.engine.attach_to_project(&id, 1, "7").await;
    assert!(matches!(result, Err(LifecycleError::Forbidden)));
    assert_eq!(h.engine.lookup_project_file(1).unwrap(), None);
}

#[tokio::test]
async fn test_attach_unknown_file() {
    let h = harness();
    assert!(matches!(
        h.engine.attach_to_project("missing", 1, "42").await,
        Err(LifecycleError::NotFound)
    ));
}

#[tokio::test]
async fn test_attach_moves_project_between_files() {
    let h = harness();
    let first = h.ready("42").await;
    let second = h.ready("42").await;

    h.engine.attach_to_project(&first, 1, "42").await.unwrap();
    assert_eq!(h.engine.lookup_project_file(1).unwrap(), Some(first.clone()));

    let attached = h.engine.attach_to_project(&second, 1, "42").await.unwrap();
    assert_eq!(attached.project_id, Some(1));
    assert_eq!(h.engine.lookup_project_file(1).unwrap(), Some(second));
    assert_eq!(h.engine.get_file(&first).unwrap().project_id, None);
}

#[tokio::test]
async fn test_attach_is_idempotent() {
    let h = harness();
    let id = h.ready("42").await;

    h.engine.attach_to_project(&id, 1, "42").await.unwrap();
    h.engine.attach_to_project(&id, 1, "42").await.unwrap();

    assert_eq!(h.engine.lookup_project_file(1).unwrap(), Some(id.clone()));
    assert_eq!(h.engine.get_file(&id).unwrap().status, FileStatus::Ready);
    assert_eq!(h.publisher.events().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_attaches_leave_one_holder() {
    let h = harness();
    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(h.ready("42").await);
    }

    let reader_db = h.db.clone();
    let reader = tokio::task::spawn_blocking(move || {
        for _ in 0..200 {
            let holders = reader_db
                .list_files_by_owner("42", None)
                .unwrap()
                .into_iter()
                .filter(|f| f.project_id == Some(1))
                .count();
            assert!(holders <= 1, "observed {holders} files holding the project");
        }
    });

    let mut tasks = Vec::new();
    for id in ids.clone() {
        let engine = Arc::clone(&h.engine);
        tasks.push(tokio::spawn(async move {
            engine.attach_to_project(&id, 1, "42").await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    reader.await.unwrap();

    let holders: Vec<_> = h
        .db
        .list_files_by_owner("42", None)
        .unwrap()
        .into_iter()
        .filter(|f| f.project_id == Some(1))
        .collect();
    assert_eq!(holders.len(), 1);

    let winner = h.engine.lookup_project_file(1).unwrap().unwrap();
    assert_eq!(winner, holders[0].id);
    assert!(ids.contains(&winner));
}

// ============================================================================
// request_download / delete_file
// ============================================================================

#[tokio::test]
async fn test_download_only_for_ready_files() {
    let h = harness();
    let id = h.pending("42").await;

    assert!(matches!(
        h.engine.request_download(&id, "42").await,
        Err(LifecycleError::NotFound)
    ));

    h.engine.complete_upload(&id, "42").await.unwrap();

    // Any authenticated caller may download
    let ticket = h.engine.request_download(&id, "7").await.unwrap();
    assert!(ticket.download_url.contains("op=read"));
    assert_eq!(ticket.file.id, id);
    assert_eq!(ticket.expires_in_seconds, 900);
}

#[tokio::test]
async fn test_delete_requires_owner() {
    let h = harness();
    let id = h.ready("42").await;

    assert!(matches!(
        h.engine.delete_file(&id, "7").await,
        Err(LifecycleError::Forbidden)
    ));
    assert_eq!(h.engine.get_file(&id).unwrap().status, FileStatus::Ready);
}

#[tokio::test]
async fn test_delete_twice_is_not_found() {
    let h = harness();
    let id = h.pending("42").await;

    h.engine.delete_file(&id, "42").await.unwrap();
    assert!(matches!(
        h.engine.delete_file(&id, "42").await,
        Err(LifecycleError::NotFound)
    ));
    assert!(matches!(
        h.engine.get_file(&id),
        Err(LifecycleError::NotFound)
    ));

    // The record itself is kept
    assert_eq!(h.db.get_file(&id).unwrap().unwrap().status, FileStatus::Deleted);
}

#[tokio::test]
async fn test_delete_removes_object_before_marking_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    let storage = Arc::new(ObservingStorage {
        db: db.clone(),
        removed: Mutex::new(Vec::new()),
    });
    let engine = LifecycleEngine::new(
        db.clone(),
        storage.clone(),
        Arc::new(RecordingPublisher::default()),
        UploadPolicy::default(),
    );

    let ticket = engine
        .init_upload("42", "report.pdf", "application/pdf", 10)
        .await
        .unwrap();
    let id = ticket.file.id;
    engine.complete_upload(&id, "42").await.unwrap();
    assert!(storage.removed.lock().unwrap().is_empty());

    engine.delete_file(&id, "42").await.unwrap();

    let removed = storage.removed.lock().unwrap().clone();
    assert_eq!(
        removed,
        vec![(ticket.file.object_key, Some(FileStatus::Ready))]
    );
    assert_eq!(db.get_file(&id).unwrap().unwrap().status, FileStatus::Deleted);
}

#[tokio::test]
async fn test_delete_survives_storage_failure() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    let id = "file-1";
    db.create_file(&files_manager::storage::models::NewFile {
        id: id.to_string(),
        owner_id: "42".to_string(),
        original_name: "report.pdf".to_string(),
        content_type: "application/pdf".to_string(),
        size_bytes: 10,
        object_key: "users/42/file-1".to_string(),
    })
    .unwrap();
    db.mark_ready(id).unwrap().unwrap();

    let engine = LifecycleEngine::new(
        db.clone(),
        Arc::new(UnavailableStorage::default()),
        Arc::new(RecordingPublisher::default()),
        UploadPolicy::default(),
    );

    engine.delete_file(id, "42").await.unwrap();
    assert_eq!(db.get_file(id).unwrap().unwrap().status, FileStatus::Deleted);
}

#[tokio::test]
async fn test_deleted_files_never_listed() {
    let h = harness();
    let id = h.ready("42").await;
    h.engine.delete_file(&id, "42").await.unwrap();

    assert!(h
        .engine
        .list_owner_files("42", Some(FileStatus::Deleted))
        .unwrap()
        .is_empty());
    assert!(h.engine.list_owner_files("42", None).unwrap().is_empty());
}

#[tokio::test]
async fn test_deleted_project_holder_is_hidden() {
    let h = harness();
    let id = h.ready("42").await;
    h.engine.attach_to_project(&id, 1, "42").await.unwrap();

    h.engine.delete_file(&id, "42").await.unwrap();
    assert_eq!(h.engine.lookup_project_file(1).unwrap(), None);
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_full_lifecycle() {
    let h = harness();

    let a = h.pending("42").await;
    assert!(matches!(
        h.engine.attach_to_project(&a, 1, "42").await,
        Err(LifecycleError::InvalidState(_))
    ));

    h.engine.complete_upload(&a, "42").await.unwrap();
    h.engine.attach_to_project(&a, 1, "42").await.unwrap();
    assert_eq!(h.engine.lookup_project_file(1).unwrap(), Some(a.clone()));

    let b = h.ready("42").await;
    h.engine.attach_to_project(&b, 1, "42").await.unwrap();
    assert_eq!(h.engine.lookup_project_file(1).unwrap(), Some(b.clone()));
    assert_eq!(h.engine.get_file(&a).unwrap().project_id, None);

    // A lost its project but is still READY, so anyone may still read it
    let ticket = h.engine.request_download(&a, "7").await.unwrap();
    assert_eq!(ticket.file.id, a);
    assert_eq!(ticket.file.project_id, None);

    // Put B's bytes where the local backend keeps them, then delete B
    let b_key = h.engine.get_file(&b).unwrap().object_key;
    let b_path = h.dir.path().join("objects").join(&b_key);
    std::fs::create_dir_all(b_path.parent().unwrap()).unwrap();
    std::fs::write(&b_path, b"%PDF-1.7").unwrap();

    h.engine.delete_file(&b, "42").await.unwrap();
    assert!(!b_path.exists());
    assert_eq!(h.db.get_file(&b).unwrap().unwrap().status, FileStatus::Deleted);
    assert_eq!(h.engine.lookup_project_file(1).unwrap(), None);
    assert!(matches!(
        h.engine.request_download(&b, "42").await,
        Err(LifecycleError::NotFound)
    ));

    let listed: Vec<String> = h
        .engine
        .list_owner_files("42", None)
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(listed, vec![a]);

    let ready_events = h.publisher.events();
    assert_eq!(ready_events.len(), 2);
    assert!(ready_events.iter().all(|e| e.event == FILE_READY));
}
