use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, AppQuery, JSend, JSendPaginated, Pagination};
use crate::auth::Caller;
use crate::storage::models::{FileRecord, FileStatus};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub id: String,
    pub owner_user_id: String,
    pub project_id: Option<i64>,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub object_key: String,
    pub status: FileStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub file_id: String,
    pub object_key: String,
    pub upload_url: String,
    pub expires_in_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct FileEnvelope {
    pub file: FileResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequest {
    pub project_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub file: FileResponse,
    pub download_url: String,
    pub expires_in_seconds: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFileResponse {
    pub file_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub status: Option<String>,
}

fn default_limit() -> u32 {
    20
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn init_upload(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    AppJson(req): AppJson<InitUploadRequest>,
) -> Result<Json<JSend<InitUploadResponse>>, ApiError> {
    let ticket = state
        .engine
        .init_upload(
            caller.id(),
            &req.original_name,
            &req.content_type,
            req.size_bytes,
        )
        .await?;

    Ok(JSend::success(InitUploadResponse {
        file_id: ticket.file.id.clone(),
        object_key: ticket.file.object_key.clone(),
        upload_url: ticket.upload_url,
        expires_in_seconds: ticket.expires_in_seconds,
    }))
}

pub async fn complete_upload(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JSend<FileEnvelope>>, ApiError> {
    let file = state.engine.complete_upload(&id, caller.id()).await?;
    Ok(JSend::success(FileEnvelope {
        file: file_to_response(&file),
    }))
}

pub async fn attach_to_project(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    AppJson(req): AppJson<AttachRequest>,
) -> Result<Json<JSend<FileEnvelope>>, ApiError> {
    let file = state
        .engine
        .attach_to_project(&id, req.project_id, caller.id())
        .await?;
    Ok(JSend::success(FileEnvelope {
        file: file_to_response(&file),
    }))
}

pub async fn request_download(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JSend<DownloadResponse>>, ApiError> {
    let ticket = state.engine.request_download(&id, caller.id()).await?;
    Ok(JSend::success(DownloadResponse {
        file: file_to_response(&ticket.file),
        download_url: ticket.download_url,
        expires_in_seconds: ticket.expires_in_seconds,
    }))
}

pub async fn file_by_project(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(project_id): Path<String>,
) -> Result<Json<JSend<ProjectFileResponse>>, ApiError> {
    let project_id: i64 = project_id
        .parse()
        .map_err(|_| ApiError::bad_request("project id must be an integer"))?;

    let file_id = state.engine.lookup_project_file(project_id)?;
    Ok(JSend::success(ProjectFileResponse { file_id }))
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JSend<DeleteResponse>>, ApiError> {
    state.engine.delete_file(&id, caller.id()).await?;
    Ok(JSend::success(DeleteResponse {
        status: "deleted".to_string(),
    }))
}

pub async fn get_file(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JSend<FileEnvelope>>, ApiError> {
    let file = state.engine.get_file(&id)?;
    Ok(JSend::success(FileEnvelope {
        file: file_to_response(&file),
    }))
}

pub async fn list_files(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    AppQuery(params): AppQuery<ListFilesParams>,
) -> Result<Json<JSendPaginated<FileResponse>>, ApiError> {
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }

    let status = match params.status.as_deref() {
        Some(raw) => match FileStatus::parse(raw) {
            Some(FileStatus::Deleted) => {
                return Err(ApiError::bad_request("deleted files cannot be listed"))
            }
            Some(status) => Some(status),
            None => return Err(ApiError::bad_request(format!("unknown status '{raw}'"))),
        },
        None => None,
    };

    let files = state.engine.list_owner_files(caller.id(), status)?;
    let total = files.len() as u64;
    let items: Vec<FileResponse> = files
        .iter()
        .skip(params.offset as usize)
        .take(params.limit as usize)
        .map(file_to_response)
        .collect();

    Ok(JSendPaginated::page(
        items,
        Pagination {
            limit: params.limit,
            offset: params.offset,
            total,
        },
    ))
}

// ============================================================================
// Helpers
// ============================================================================

fn file_to_response(file: &FileRecord) -> FileResponse {
    FileResponse {
        id: file.id.clone(),
        owner_user_id: file.owner_id.clone(),
        project_id: file.project_id,
        original_name: file.original_name.clone(),
        content_type: file.content_type.clone(),
        size_bytes: file.size_bytes,
        object_key: file.object_key.clone(),
        status: file.status,
        created_at: file.created_at.to_rfc3339(),
        updated_at: file.updated_at.to_rfc3339(),
    }
}
