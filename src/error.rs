//! Error handling module
//!
//! HTTP-facing error type and response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::LedgerError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Idempotency conflict: same key with different request")]
    IdempotencyConflict,

    #[error("A request with this idempotency key is still being processed")]
    IdempotencyInProgress,

    // Ledger errors
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    // Server errors (5xx)
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    /// HTTP status and stable error code
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::MissingHeader(_) => (StatusCode::BAD_REQUEST, "missing_header"),
            AppError::IdempotencyConflict => (StatusCode::CONFLICT, "idempotency_conflict"),
            AppError::IdempotencyInProgress => (StatusCode::CONFLICT, "idempotency_in_progress"),
            AppError::Ledger(err) => (ledger_status(err), err.error_code()),
            AppError::Store(err) => match err {
                StoreError::VersionConflict { .. } => (StatusCode::CONFLICT, "version_conflict"),
                StoreError::Duplicate(_) => (StatusCode::CONFLICT, "duplicate_obligation"),
                StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
                StoreError::NotEnrolled { .. } => (StatusCode::LOCKED, "session_closed"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            },
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
        }
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::Overpayment { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::DuplicateObligation(_)
        | LedgerError::VersionConflict { .. }
        | LedgerError::AlreadyPromoted { .. } => StatusCode::CONFLICT,
        LedgerError::TenantScope { .. } => StatusCode::FORBIDDEN,
        LedgerError::LockedPeriod { .. } | LedgerError::SessionClosed { .. } => StatusCode::LOCKED,
        LedgerError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();

        let details = match &self {
            AppError::InvalidRequest(msg) => Some(msg.clone()),
            AppError::MissingHeader(header) => Some(header.clone()),
            AppError::Ledger(err) if status != StatusCode::INTERNAL_SERVER_ERROR => Some(err.to_string()),
            _ => None,
        };

        // Internal detail stays in the logs
        let error = if status.is_server_error() {
            tracing::error!(error = %self, error_code, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
