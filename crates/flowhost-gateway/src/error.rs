use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use flowhost_core::error::FlowhostError;

/// Handler error rendered as `{error, kind, node}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    SessionNotFound(String),
    Flowhost(FlowhostError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::Flowhost(FlowhostError::AgentNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Flowhost(e) if e.is_definition_error() => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Flowhost(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Flowhost(e) => e.kind(),
        }
    }
}

impl From<FlowhostError> for ApiError {
    fn from(err: FlowhostError) -> Self {
        Self::Flowhost(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, node) = match &self {
            Self::BadRequest(msg) => (msg.clone(), None),
            Self::SessionNotFound(id) => (format!("Session not found: {id}"), None),
            Self::Flowhost(e) => (e.to_string(), e.failed_node().map(str::to_string)),
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), kind = self.kind(), node = node.as_deref(), error = %message, "Request failed");
        }
        let body = serde_json::json!({
            "error": message,
            "kind": self.kind(),
            "node": node,
        });
        (status, Json(body)).into_response()
    }
}
