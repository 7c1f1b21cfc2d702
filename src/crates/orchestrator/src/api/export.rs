//! Export endpoints (request / status / download / clear).

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use crate::api::{user_of, AppState};
use crate::error::Result;

/// POST /export/request; 202; bundling happens in the background.
pub async fn request(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let user = user_of(&headers)?;
    state.exports.request_export(&user).await?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /export/status; expired bundles are cleared on access.
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<store::ExportStatus>> {
    let user = user_of(&headers)?;
    state.exports.sweep_expired(&user).await?;
    Ok(Json(state.exports.status(&user).await?))
}

/// GET /export/download; the gzipped bundle while it is still `ready`.
pub async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let user = user_of(&headers)?;
    state.exports.sweep_expired(&user).await?;
    let bytes = state.exports.download(&user).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"export-{user}.json.gz\""),
            ),
        ],
        bytes,
    ))
}

/// DELETE /export
pub async fn clear(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    let user = user_of(&headers)?;
    state.exports.clear(&user).await?;
    Ok(StatusCode::NO_CONTENT)
}
