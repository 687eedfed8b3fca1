use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy for the receivables core.
///
/// Every entry point returns one of these so the HTTP layer can translate
/// deterministically. The core never logs-and-swallows: failures propagate
/// up as a variant and are rendered exactly once at the boundary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(anyhow::Error),

    #[error("Validation error: {0}")]
    ValidationErrors(#[from] validator::ValidationErrors),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Over-allocation: {0}")]
    OverAllocation(anyhow::Error),

    #[error("Invalid state: {0}")]
    InvalidState(anyhow::Error),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a validation failure with a plain message.
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(anyhow::anyhow!(msg.into()))
    }

    /// Machine-readable error kind, used for metrics labels and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::ValidationErrors(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::OverAllocation(_) => "over_allocation",
            AppError::InvalidState(_) => "invalid_state",
            AppError::ConcurrencyConflict(_) => "concurrency_conflict",
            AppError::Conflict(_) => "conflict",
            AppError::DatabaseError(_) => "database",
            AppError::ConfigError(_) => "config",
            AppError::InternalError(_) => "internal",
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            kind: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let kind = self.kind();
        let (status, error_message, details, retry_after) = match self {
            AppError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string(), None, None),
            AppError::ValidationErrors(err) => (
                StatusCode::BAD_REQUEST,
                "Validation error".to_string(),
                Some(err.to_string()),
                None,
            ),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None, None),
            AppError::OverAllocation(err) => (StatusCode::CONFLICT, err.to_string(), None, None),
            AppError::InvalidState(err) => {
                (StatusCode::UNPROCESSABLE_ENTITY, err.to_string(), None, None)
            }
            // Retryable: the caller should re-read current state and reapply.
            AppError::ConcurrencyConflict(err) => {
                (StatusCode::CONFLICT, err.to_string(), None, Some(1u64))
            }
            AppError::Conflict(err) => (StatusCode::CONFLICT, err.to_string(), None, None),
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(err.to_string()),
                None,
            ),
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
                None,
            ),
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(format!("{:#}", err)),
                None,
            ),
        };

        let mut res = (
            status,
            Json(ErrorResponse {
                error: error_message,
                kind,
                details,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        let cases = [
            (AppError::validation("bad"), StatusCode::BAD_REQUEST),
            (
                AppError::NotFound(anyhow::anyhow!("missing")),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::OverAllocation(anyhow::anyhow!("exceeds")),
                StatusCode::CONFLICT,
            ),
            (
                AppError::InvalidState(anyhow::anyhow!("frozen")),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AppError::ConcurrencyConflict(anyhow::anyhow!("stale")),
                StatusCode::CONFLICT,
            ),
        ];
        for (err, expected) in cases {
            let res = err.into_response();
            assert_eq!(res.status(), expected);
        }
    }

    #[test]
    fn concurrency_conflict_carries_retry_guidance() {
        let res = AppError::ConcurrencyConflict(anyhow::anyhow!("version mismatch")).into_response();
        assert!(res.headers().contains_key(axum::http::header::RETRY_AFTER));
    }
}
