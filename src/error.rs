use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeolocationError {
    #[error("location permission denied; allow location access to see your own position")]
    PermissionDenied,

    #[error("location unavailable: {0}; check that location services are enabled")]
    Unavailable(String),

    #[error("timed out reading your location; move to an open area or try again")]
    Timeout,
}

#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// The backend refused a user-initiated command (e.g. cancel outside the window).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Network failure or 5xx; polling loops retry these on the next tick.
    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("malformed response: {0}")]
    DataShape(String),

    #[error(transparent)]
    Geolocation(#[from] GeolocationError),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_) | AppError::DataShape(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Transient(_) | AppError::DataShape(_) => StatusCode::BAD_GATEWAY,
            AppError::Geolocation(_) | AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
