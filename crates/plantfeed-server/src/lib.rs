//! Plantfeed Server Library
//!
//! Ingests XML production reports written by an asphalt batching plant to an
//! FTP drop and stores them as batch events and daily aggregates.
//!
//! # Overview
//!
//! - **Ingestion core** ([`ingest`]): remote source, record extractor,
//!   persistence, run coordinator, progress feed and recovery monitor
//! - **HTTP surface** ([`features`]): thin trigger/query adapter over the
//!   ingestion service, mounted under `/api/v1`
//! - **Configuration** ([`config`]): environment-based server settings
//! - **Middleware** ([`middleware`]): CORS and request tracing
//!
//! # Example
//!
//! ```no_run
//! use plantfeed_server::{config::Config, ingest::{IngestConfig, IngestService}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = config.database.connect().await?;
//!     let service = IngestService::postgres(pool, &IngestConfig::from_env()?);
//!     let run_id = service.start_manual_run().await?;
//!     service.wait(run_id).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;

pub use error::AppError;
