use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds surfaced by the booking/payment core.
///
/// The kind carries the retry contract: `GatewayUnavailable` is transient and
/// safe to retry with backoff, `Conflict` and `GatewayRejected` are permanent
/// for the given input, `Unauthorized` events are discarded.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("payment gateway rejected the request: {0}")]
    GatewayRejected(String),
    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::GatewayRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Store(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ApiError {
    success: bool,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        let message = match self {
            // Do not leak storage/internal details to API clients.
            Error::Store(_) | Error::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(ApiError { success: false, message })).into_response()
    }
}
