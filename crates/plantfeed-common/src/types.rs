//! Wire-level types shared by the ingestion core, the HTTP surface and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CommonError;

/// Lifecycle state of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Processing,
    Paused,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Processing => "processing",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Interrupted => "interrupted",
            RunStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` never change again. `interrupted` is left to
    /// the recovery path and is not considered terminal here.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Processing | RunStatus::Paused)
    }

    /// Whether a progress event can still follow. An interrupted run stays
    /// quiet until someone resumes it.
    pub fn has_live_feed(&self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Processing | RunStatus::Paused)
    }
}

impl FromStr for RunStatus {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "processing" => Ok(RunStatus::Processing),
            "paused" => Ok(RunStatus::Paused),
            "completed" => Ok(RunStatus::Completed),
            "interrupted" => Ok(RunStatus::Interrupted),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(CommonError::invalid_variant("run status", s)),
        }
    }
}

impl TryFrom<String> for RunStatus {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, CommonError> {
        value.parse()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result recorded for one file-processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcomeStatus {
    Success,
    Skipped,
    Error,
}

impl FileOutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOutcomeStatus::Success => "success",
            FileOutcomeStatus::Skipped => "skipped",
            FileOutcomeStatus::Error => "error",
        }
    }

    /// Whether a file with this outcome is excluded from future discovery.
    pub fn is_settled(&self) -> bool {
        matches!(self, FileOutcomeStatus::Success | FileOutcomeStatus::Skipped)
    }
}

impl FromStr for FileOutcomeStatus {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(FileOutcomeStatus::Success),
            "skipped" => Ok(FileOutcomeStatus::Skipped),
            "error" => Ok(FileOutcomeStatus::Error),
            _ => Err(CommonError::invalid_variant("file outcome status", s)),
        }
    }
}

impl TryFrom<String> for FileOutcomeStatus {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, CommonError> {
        value.parse()
    }
}

impl fmt::Display for FileOutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Manual,
    Scheduled,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Scheduled => "scheduled",
        }
    }
}

impl FromStr for TriggerSource {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(TriggerSource::Manual),
            "scheduled" => Ok(TriggerSource::Scheduled),
            _ => Err(CommonError::invalid_variant("trigger source", s)),
        }
    }
}

impl TryFrom<String> for TriggerSource {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, CommonError> {
        value.parse()
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Progress feed
// ============================================================================

/// What a progress event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Started,
    FileProcessed,
    Paused,
    Resumed,
    Retrying,
    Completed,
    Failed,
    Cancelled,
    Interrupted,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::Started => "started",
            ProgressStage::FileProcessed => "file_processed",
            ProgressStage::Paused => "paused",
            ProgressStage::Resumed => "resumed",
            ProgressStage::Retrying => "retrying",
            ProgressStage::Completed => "completed",
            ProgressStage::Failed => "failed",
            ProgressStage::Cancelled => "cancelled",
            ProgressStage::Interrupted => "interrupted",
        }
    }

    /// Stages after which the run emits nothing more.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ProgressStage::Completed
                | ProgressStage::Failed
                | ProgressStage::Cancelled
                | ProgressStage::Interrupted
        )
    }
}

/// One event on a run's progress feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: Uuid,
    pub stage: ProgressStage,
    pub current_file: Option<String>,
    pub files_processed: i64,
    pub total_files: i64,
    /// Records (batch events plus aggregates) written so far.
    pub batches_processed: i64,
    pub progress_percent: f64,
    pub message: String,
    pub emitted_at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(run_id: Uuid, stage: ProgressStage, message: impl Into<String>) -> Self {
        Self {
            run_id,
            stage,
            current_file: None,
            files_processed: 0,
            total_files: 0,
            batches_processed: 0,
            progress_percent: 0.0,
            message: message.into(),
            emitted_at: Utc::now(),
        }
    }

    /// Sets the counters and derives `progress_percent` from them.
    pub fn with_counts(mut self, files_processed: i64, total_files: i64, records: i64) -> Self {
        self.files_processed = files_processed;
        self.total_files = total_files;
        self.batches_processed = records;
        self.progress_percent = percent(files_processed, total_files);
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.current_file = Some(file.into());
        self
    }
}

fn percent(done: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let pct = (done as f64 / total as f64) * 100.0;
    (pct.clamp(0.0, 100.0) * 100.0).round() / 100.0
}
