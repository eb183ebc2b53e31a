//! HTTP error mapping for API handlers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::AppError;

/// Body returned for every failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Status code for an application error
pub fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::Validation { .. } | AppError::Schedule(_) => StatusCode::BAD_REQUEST,
        AppError::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert AppError to an HTTP response
pub fn handle_error(error: AppError) -> Response {
    let status = status_for(&error);
    let message = match &error {
        AppError::Validation { message } => message.clone(),
        AppError::Schedule(e) => e.to_string(),
        AppError::NotFound { resource, id } => format!("{} with id '{}' not found", resource, id),
        AppError::Database(_) | AppError::Repository(_) => {
            error!("Data access failed: {}", error);
            "Data access failed".to_string()
        }
        _ => {
            error!("Request failed: {}", error);
            error.to_string()
        }
    };

    let body = ErrorBody {
        success: false,
        error: message,
        timestamp: chrono::Utc::now(),
    };
    (status, Json(body)).into_response()
}

/// Handler error wrapper so `?` works on service results
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl<E: Into<AppError>> From<E> for ApiError {
    fn from(error: E) -> Self {
        ApiError(error.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        handle_error(self.0)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
