use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

/// Error kinds propagated out of the core (registry/room/relay/orchestrator)
/// into the signal dispatcher and HTTP handlers. The orchestrator itself
/// converts most of these into state transitions (close, mark-delete, kick)
/// rather than letting them escape a loop; the variants below are what
/// actually needs to reach a caller.
#[derive(Debug, thiserror::Error)]
pub enum SfuError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backpressure")]
    Backpressure,

    #[error("transport: {0}")]
    Transport(String),

    #[error("media: {0}")]
    Media(String),

    #[error("programming error: {0}")]
    Programming(String),
}

impl SfuError {
    pub fn username_empty() -> Self {
        SfuError::Validation("empty name".into())
    }

    pub fn username_too_long() -> Self {
        SfuError::Validation("invalid_name".into())
    }

    fn code(&self) -> &'static str {
        match self {
            SfuError::Validation(_) => "bad_payload",
            SfuError::NotFound(_) => "not_found",
            SfuError::Backpressure => "backpressure",
            SfuError::Transport(_) => "transport_error",
            SfuError::Media(_) => "media_error",
            SfuError::Programming(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            SfuError::Validation(_) => StatusCode::BAD_REQUEST,
            SfuError::NotFound(_) => StatusCode::NOT_FOUND,
            SfuError::Backpressure => StatusCode::TOO_MANY_REQUESTS,
            SfuError::Transport(_) => StatusCode::BAD_GATEWAY,
            SfuError::Media(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SfuError::Programming(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Renders the `{"type":"error","error":...}` signaling frame described
    /// in the error-handling design: the orchestrator never lets a `SfuError`
    /// escape a read loop, but the dispatcher surfaces it to the client here.
    pub fn to_signal_frame(&self) -> serde_json::Value {
        json!({ "type": "error", "error": self.to_string() })
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for SfuError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
