use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Request-level error taxonomy. Every variant maps to a status code and a
/// JSON body of the form `{"error": <message>}`; internal failures are
/// logged in full but reported with a generic message.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed or out-of-range input.
    #[error("{0}")]
    Validation(String),
    /// Missing or unverifiable credentials.
    #[error("{0}")]
    Unauthorized(String),
    /// Role/enrollment/ownership check failed.
    #[error("{0}")]
    Permission(String),
    /// Referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Write collided with an existing row (duplicate enrollment/review).
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Permission(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            // Duplicate writes report as plain bad requests, matching the
            // rest of the surface.
            AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!("internal error: {e:#}");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => AppError::NotFound("resource not found".to_string()),
            sqlx::Error::Database(db)
                if db.is_unique_violation() =>
            {
                AppError::Conflict("resource already exists".to_string())
            }
            _ => AppError::Internal(e.into()),
        }
    }
}
