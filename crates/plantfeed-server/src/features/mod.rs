//! Feature modules implementing the plantfeed API
//!
//! Each feature is a vertical slice with its own commands, queries and
//! routes. Commands and queries implement the mediator `Request` marker and
//! expose a plain `handle` function the routes call directly.
//!
//! # Features
//!
//! - **ingestion**: run triggers, pause/cancel control, run status, file
//!   outcomes and the progress feed

pub mod ingestion;

use axum::Router;

use crate::ingest::IngestService;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub ingest: IngestService,
}

/// Creates the API router with every feature mounted under its prefix:
/// - `/ingestion` - ingestion runs and outcomes
pub fn router(state: FeatureState) -> Router<()> {
    Router::new().nest("/ingestion", ingestion::ingestion_routes().with_state(state.ingest))
}
