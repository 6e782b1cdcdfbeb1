//! Plantfeed Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the plantfeed workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Types**: wire-level enums and the progress event emitted by ingestion runs
//!
//! # Example
//!
//! ```no_run
//! use plantfeed_common::types::RunStatus;
//!
//! let status: RunStatus = "paused".parse().unwrap();
//! assert!(!status.is_terminal());
//! ```

pub mod error;
pub mod logging;
pub mod types;

pub use error::{CommonError, Result};
