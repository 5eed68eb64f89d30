use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        // Files
        .route("/files", get(handlers::list_files))
        .route("/files/init", post(handlers::init_upload))
        .route("/files/by-project/:project_id", get(handlers::file_by_project))
        .route("/files/:id", get(handlers::get_file))
        .route("/files/:id", delete(handlers::delete_file))
        .route("/files/:id/attach", post(handlers::attach_to_project))
        .route("/files/:id/complete", post(handlers::complete_upload))
        .route("/files/:id/download", get(handlers::request_download))
        // Internal
        .route("/_internal/health", get(handlers::health));

    // Signed-URL byte transfer for the local backend
    if state.local_store.is_some() {
        let upload_limit = state.config.uploads.max_file_size_bytes as usize;
        router = router
            .route(
                "/_local/objects/*key",
                put(handlers::write_object).layer(DefaultBodyLimit::max(upload_limit)),
            )
            .route("/_local/objects/*key", get(handlers::read_object));
    }

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled, purge route is available");
        router = router.route("/admin/purge", delete(handlers::admin_purge));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
