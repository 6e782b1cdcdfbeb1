//! Remote file source
//!
//! A [`RemoteSource`] opens sessions against one remote directory; a
//! [`RemoteSession`] lists and downloads files and is closed explicitly by
//! its owner once the work using it is done, whether that work succeeded or
//! not.

pub mod ftp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::error::IngestResult;

pub use ftp::FtpSource;

/// A file as reported by a listing. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    pub size: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl RemoteFile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            modified_at: None,
        }
    }
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Connect and change into `remote_path`, retrying as configured.
    /// Exhausted retries surface as `ConnectionFailed`.
    async fn connect(&self, remote_path: &str) -> IngestResult<Box<dyn RemoteSession>>;

    /// Location recorded on file outcomes.
    fn file_location(&self, remote_path: &str, file_name: &str) -> String;
}

#[async_trait]
pub trait RemoteSession: Send {
    async fn list(&mut self) -> IngestResult<Vec<RemoteFile>>;

    /// Whole file body. Failures are `DownloadFailed`.
    async fn download(&mut self, file_name: &str) -> IngestResult<Vec<u8>>;

    /// Best-effort release; problems are logged, never returned.
    async fn close(self: Box<Self>);
}
