use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pulse_data::error::DataError;
use serde_json::json;

/// Error returned by HTTP handlers, rendered as `{"error": ..}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "bad_request: {msg}"),
            Self::NotFound(msg) => write!(f, "not_found: {msg}"),
            Self::Internal(msg) => write!(f, "internal_error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<DataError> for ApiError {
    fn from(error: DataError) -> Self {
        match error {
            DataError::InvalidInput(msg) => Self::BadRequest(msg),
            DataError::UnknownHorizon(id) => Self::BadRequest(format!("unknown horizon: {id}")),
            other => Self::Internal(other.to_string()),
        }
    }
}
