//! Upload, download, sharing, and the chat-deletion cascade.

use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::api::{user_of, AppState};
use crate::error::{Result, ServerError};

/// Accepted upload MIME types.
const MIME_WHITELIST: [&str; 13] = [
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/markdown",
    "text/plain",
    "text/csv",
    "text/html",
];

fn mime_allowed(mime: &str) -> bool {
    MIME_WHITELIST.contains(&mime)
}

/// POST /upload; multipart; returns the file handle. PDF indexing is
/// requested asynchronously; `indexed` flips once the indexer calls back.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<store::FileHandle>> {
    let user = user_of(&headers)?;
    let store = state.orchestrator.store();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ServerError::MissingField("filename".to_string()))?;
        let mime = field
            .content_type()
            .map(str::to_string)
            .ok_or_else(|| ServerError::MissingField("content type".to_string()))?;
        if !mime_allowed(&mime) {
            return Err(ServerError::UnsupportedFileType(mime));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        let handle = store::FileHandle {
            file_id: Uuid::new_v4().to_string(),
            filename,
            mime: mime.clone(),
            size: bytes.len() as u64,
            indexed: false,
            uploaded_at: Utc::now(),
            source: "upload".to_string(),
            vector_ids: Vec::new(),
        };
        store.put_file(&user, &handle, &bytes).await?;

        if mime == "application/pdf" {
            tracing::info!(user = %user, file = %handle.file_id, "requesting async indexing");
        }
        return Ok(Json(handle));
    }
    Err(ServerError::MissingField("file".to_string()))
}

/// POST /files/{id}/indexed; callback from the indexing service.
pub async fn mark_indexed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(file_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<StatusCode> {
    let user = user_of(&headers)?;
    let store = state.orchestrator.store();
    let (mut handle, _) = store.get_file(&user, &file_id).await?;
    handle.indexed = true;
    if let Some(vector_ids) = body.get("vector_ids").and_then(|v| v.as_array()) {
        handle.vector_ids = vector_ids
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
    }
    store.update_file_meta(&user, &handle).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn file_response(handle: store::FileHandle, bytes: Vec<u8>) -> impl IntoResponse {
    let disposition = format!("attachment; filename=\"{}\"", handle.filename);
    (
        [
            (header::CONTENT_TYPE, handle.mime),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
}

/// GET /files/{id}
pub async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse> {
    let user = user_of(&headers)?;
    let (handle, bytes) = state.orchestrator.store().get_file(&user, &file_id).await?;
    Ok(file_response(handle, bytes))
}

/// GET /share/{token}/files/{id}; token must resolve, and the file must
/// belong to the user the token scopes.
pub async fn shared_download(
    State(state): State<AppState>,
    Path((token, file_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let store = state.orchestrator.store();
    let (owner, _conversation) = store
        .get_share_scope(&token)
        .await?
        .ok_or(ServerError::InvalidShareToken)?;
    let (handle, bytes) = store.get_file(&owner, &file_id).await?;
    Ok(file_response(handle, bytes))
}

/// DELETE /chat/{conversation_id}; cascades to messages, the session, and
/// its sandbox binding.
pub async fn delete_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let user = user_of(&headers)?;
    let orchestrator = &state.orchestrator;

    orchestrator
        .sessions
        .destroy(&(user.clone(), conversation_id.clone()))
        .await;
    orchestrator
        .store()
        .delete_conversation(&user, &conversation_id)
        .await?;

    Ok(Json(json!({"deleted": conversation_id})))
}
