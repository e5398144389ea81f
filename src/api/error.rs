use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::session::SessionError;

/// Structured error type for the transport endpoints.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Tool failures never surface here; they
/// travel back over the event stream as JSON-RPC errors.
#[derive(Debug)]
pub enum ApiError {
    /// 404 - A message was posted while no stream is open.
    NoActiveSession,
    /// 400 - The body is not a JSON-RPC client message.
    InvalidMessage(String),
    /// 400 - The sessionId query parameter is not a session id.
    InvalidSessionId(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NoActiveSession => StatusCode::NOT_FOUND,
            ApiError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidSessionId(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NoActiveSession => "no_active_session",
            ApiError::InvalidMessage(_) => "invalid_message",
            ApiError::InvalidSessionId(_) => "invalid_session_id",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::NoActiveSession => {
                "No active session. Open the event stream at /sse first.".to_string()
            }
            ApiError::InvalidMessage(detail) => format!("Invalid message: {}.", detail),
            ApiError::InvalidSessionId(id) => format!("Invalid session id: {}.", id),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NoActiveSession => ApiError::NoActiveSession,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}
