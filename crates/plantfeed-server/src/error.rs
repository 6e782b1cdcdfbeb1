//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ingest::IngestError;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "A database error occurred".to_string())
            },
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message.clone()),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Internal(message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            },
            AppError::Ingest(e) => match e {
                IngestError::LockContention { .. } | IngestError::NothingToResume(_) => {
                    (StatusCode::CONFLICT, e.to_string())
                },
                IngestError::RunNotFound(_) | IngestError::ScheduleNotFound(_) => {
                    (StatusCode::NOT_FOUND, e.to_string())
                },
                IngestError::Storage(inner) => {
                    tracing::error!("Database error: {:?}", inner);
                    (StatusCode::INTERNAL_SERVER_ERROR, "A database error occurred".to_string())
                },
                other => {
                    tracing::error!("Ingestion error: {}", other);
                    (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
                },
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = self.status_and_message();

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_ingest_errors_map_to_status_codes() {
        let cases = [
            (IngestError::LockContention { holder: "run".into() }, StatusCode::CONFLICT),
            (IngestError::NothingToResume(Uuid::nil()), StatusCode::CONFLICT),
            (IngestError::RunNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (IngestError::ScheduleNotFound(3), StatusCode::NOT_FOUND),
            (IngestError::Coordination("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(AppError::from(error).into_response().status(), expected);
        }
    }

    #[test]
    fn test_storage_details_are_not_leaked() {
        let (status, message) =
            AppError::from(IngestError::Storage(sqlx::Error::PoolTimedOut)).status_and_message();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "A database error occurred");
    }
}
