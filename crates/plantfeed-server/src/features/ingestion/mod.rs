//! Ingestion feature module
//!
//! HTTP adapter over the ingestion service: start, resume, cancel, pause and
//! query runs, list file outcomes and follow a run's progress.

pub mod commands;
pub mod queries;
pub mod routes;


pub use routes::ingestion_routes;
