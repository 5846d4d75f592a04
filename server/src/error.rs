use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use textsearch_core::Error;

/// Handler error: a core error or a rejected admin token.
#[derive(Debug)]
pub enum ApiError {
    Core(Error),
    Unauthorized(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self { ApiError::Core(err) }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Core(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Core(Error::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Core(Error::Serialization(_) | Error::Upstream(_) | Error::Internal(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Core(err) => err.to_string(),
            ApiError::Unauthorized(msg) => msg.clone(),
        };
        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }
        let mut body = serde_json::json!({ "error": message });
        if let ApiError::Core(err) = &self {
            if err.is_retryable() {
                body["retryable"] = serde_json::Value::Bool(true);
            }
        }
        (status, Json(body)).into_response()
    }
}
