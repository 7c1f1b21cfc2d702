//! Server-side error taxonomy.
//!
//! User errors stop a request before a run starts; everything else is
//! converted into in-band events so a run always terminates with `done` or
//! `error` on the wire.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid share token")]
    InvalidShareToken,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("a run is already active for this session")]
    RunActive,

    #[error("no run awaiting input")]
    NoPendingInterrupt,

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] llm::LlmConfigError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::UnsupportedFileType(_) | ServerError::MissingField(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::InvalidShareToken => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::RunActive => StatusCode::CONFLICT,
            ServerError::NoPendingInterrupt => StatusCode::CONFLICT,
            ServerError::Store(store::StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Store(store::StoreError::Conflict(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = axum::Json(serde_json::json!({
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
