//! Centralized error handling for the lending engine
//!
//! Every lifecycle and scoring operation returns [`LendingError`]. Each variant
//! carries a stable discriminant code so callers can branch on the failure
//! kind, and the HTTP layer renders it with the matching status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Lending engine error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum LendingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Already rated: {0}")]
    AlreadyRated(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LendingError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            LendingError::Validation(_) => "VALIDATION_ERROR",
            LendingError::InvalidState(_) => "INVALID_STATE",
            LendingError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            LendingError::NotFound(_) => "NOT_FOUND",
            LendingError::Forbidden(_) => "FORBIDDEN",
            LendingError::AlreadyRated(_) => "ALREADY_RATED",
            LendingError::Unauthorized(_) => "UNAUTHORIZED",
            LendingError::Conflict(_) => "CONFLICT",
            LendingError::Database(_) => "DATABASE_ERROR",
            LendingError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            LendingError::Validation(_) => StatusCode::BAD_REQUEST,
            LendingError::InvalidState(_) => StatusCode::CONFLICT,
            LendingError::InsufficientFunds(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LendingError::NotFound(_) => StatusCode::NOT_FOUND,
            LendingError::Forbidden(_) => StatusCode::FORBIDDEN,
            LendingError::AlreadyRated(_) => StatusCode::CONFLICT,
            LendingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            LendingError::Conflict(_) => StatusCode::CONFLICT,
            LendingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LendingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client errors are never retried automatically
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl IntoResponse for LendingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        // Log server errors
        match &self {
            LendingError::Database(_) | LendingError::Internal(_) => {
                tracing::error!(error = %message, code = %error_code, "Server error occurred");
            }
            _ => {
                tracing::debug!(error = %message, code = %error_code, "Client error occurred");
            }
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

// Convenience conversions from common error types

impl From<StoreError> for LendingError {
    fn from(err: StoreError) -> Self {
        LendingError::Database(err.to_string())
    }
}

impl From<sqlx::Error> for LendingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => LendingError::NotFound("Resource not found".to_string()),
            _ => LendingError::Database(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for LendingError {
    fn from(err: validator::ValidationErrors) -> Self {
        LendingError::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for LendingError {
    fn from(err: serde_json::Error) -> Self {
        LendingError::Validation(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias using LendingError
pub type LendingResult<T> = Result<T, LendingError>;
