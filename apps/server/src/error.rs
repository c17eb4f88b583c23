use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Sync(#[from] bankfeed_core::Error),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    body: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::BadRequest(message) => tracing::warn!("Bad request: {}", message),
            ApiError::Sync(err) => tracing::error!("Request failed ({}): {}", err.kind(), err),
        }
        // Every hand-off failure is reported as a 400 with the cause in `body`.
        let status = StatusCode::BAD_REQUEST;
        let body = ErrorBody {
            status_code: status.as_u16(),
            body: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
