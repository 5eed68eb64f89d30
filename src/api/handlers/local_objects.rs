use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::api::response::{ApiError, AppQuery};
use crate::object_store::{LocalStore, ObjectOperation, ObjectStoreError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedParams {
    pub op: String,
    pub expires: i64,
    pub signature: String,
}

fn local_store(state: &AppState) -> Result<&LocalStore, ApiError> {
    state
        .local_store
        .as_deref()
        .ok_or_else(|| ApiError::not_found("Local object storage is not enabled"))
}

fn check_signature(
    store: &LocalStore,
    op: ObjectOperation,
    key: &str,
    content_type: Option<&str>,
    params: &SignedParams,
) -> Result<(), ApiError> {
    let valid = params.op == op.as_str()
        && store.verify(
            op,
            key,
            params.expires,
            content_type,
            &params.signature,
            chrono::Utc::now(),
        );
    if !valid {
        return Err(ApiError::forbidden("Invalid or expired signature"));
    }
    Ok(())
}

fn storage_error(e: ObjectStoreError) -> ApiError {
    match e {
        ObjectStoreError::NotFound(_) => ApiError::not_found("Object not found"),
        ObjectStoreError::InvalidKey(_) => ApiError::bad_request("Invalid object key"),
        _ => ApiError::internal(format!("Failed to access object: {e}")),
    }
}

/// Receive object bytes through a signed write URL.
/// Route: PUT /_local/objects/*key
pub async fn write_object(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    AppQuery(params): AppQuery<SignedParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let store = local_store(&state)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    check_signature(store, ObjectOperation::Write, &key, content_type, &params)?;

    let size = body.len();
    store.put(&key, body).await.map_err(storage_error)?;

    tracing::debug!(object_key = %key, size, "Stored object");
    Ok(StatusCode::OK)
}

/// Stream object bytes through a signed read URL.
/// Route: GET /_local/objects/*key
pub async fn read_object(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    AppQuery(params): AppQuery<SignedParams>,
) -> Result<Response, ApiError> {
    let store = local_store(&state)?;
    check_signature(store, ObjectOperation::Read, &key, None, &params)?;

    let file = store.open(&key).await.map_err(storage_error)?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("private, no-store"),
    );

    Ok(response)
}
