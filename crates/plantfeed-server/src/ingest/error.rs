//! Errors raised by the ingestion pipeline.
//!
//! File- and record-scoped kinds never leave the per-file boundary; they end
//! up as `error` file outcomes. Run-scoped kinds propagate out of the
//! coordinator and are classified here for the retry policy.

use thiserror::Error;
use uuid::Uuid;

pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Longest error message stored on a file outcome.
pub const MAX_OUTCOME_MESSAGE_CHARS: usize = 500;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Download of '{file}' failed: {reason}")]
    DownloadFailed { file: String, reason: String },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Could not derive date from file name '{0}'")]
    DateDerivation(String),

    #[error("Ingestion already running (held by {holder})")]
    LockContention { holder: String },

    #[error("Pause exceeded the {0}s ceiling")]
    PauseTimeout(u64),

    #[error("Run exceeded its soft time limit of {0}s")]
    RunTimeout(u64),

    #[error("Run {0} was cancelled")]
    Cancelled(Uuid),

    #[error("Run {0} was superseded by a newer run")]
    Superseded(Uuid),

    #[error("Schedule {0} not found or inactive")]
    ScheduleNotFound(i64),

    #[error("Run {0} not found")]
    RunNotFound(Uuid),

    #[error("Run {0} has no checkpoint or recovery snapshot to resume from")]
    NothingToResume(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Coordination store error: {0}")]
    Coordination(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Whether the supervisor should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::ConnectionFailed(_)
                | IngestError::DownloadFailed { .. }
                | IngestError::PauseTimeout(_)
                | IngestError::RunTimeout(_)
                | IngestError::Storage(_)
                | IngestError::Coordination(_)
                | IngestError::Internal(_)
        )
    }

    /// Stops that end a run quietly: no failure event, no retry.
    pub fn is_silent(&self) -> bool {
        matches!(self, IngestError::Cancelled(_) | IngestError::Superseded(_))
    }

    /// Message suitable for a file outcome row.
    pub fn outcome_message(&self) -> String {
        truncate_message(&self.to_string())
    }
}

/// Cut `message` to at most [`MAX_OUTCOME_MESSAGE_CHARS`] characters.
pub fn truncate_message(message: &str) -> String {
    match message.char_indices().nth(MAX_OUTCOME_MESSAGE_CHARS) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
