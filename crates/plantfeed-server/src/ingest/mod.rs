//! Batch report ingestion
//!
//! Pulls XML production reports from the plant's FTP drop and turns them into
//! batch events and daily aggregates:
//!
//! 1. [`service::IngestService`] takes the single-run lock and spawns a run
//! 2. [`coordinator::RunCoordinator`] lists the remote directory, filters out
//!    settled files and walks the rest in chunks, checkpointing after each file
//! 3. [`processor::process_file`] downloads, validates and extracts one file
//!    and records its outcome
//! 4. [`progress::ProgressPublisher`] fans progress events out to subscribers
//! 5. [`recovery::RecoveryMonitor`] fails or interrupts runs that stopped
//!    reporting, driven by [`scheduler::IngestScheduler`]

pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod models;
pub mod persistence;
pub mod processor;
pub mod progress;
pub mod recovery;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use config::IngestConfig;
pub use error::{IngestError, IngestResult};
pub use recovery::RecoveryMonitor;
pub use scheduler::IngestScheduler;
pub use service::IngestService;
