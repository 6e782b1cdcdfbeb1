//! Ingestion routes
//!
//! Trigger, control and query endpoints over [`IngestService`], plus a
//! server-sent-events feed of a run's progress. No authentication here; the
//! deployment fronting this service is responsible for it.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use plantfeed_common::types::ProgressEvent;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use super::commands::{
    cancel_run::handle as handle_cancel_run, resume_run::handle as handle_resume_run,
    set_paused::handle as handle_set_paused, start_run::handle as handle_start_run,
    CancelRunCommand, ResumeRunCommand, SetPausedCommand, StartRunCommand,
};
use super::queries::{
    get_recovery_candidate::handle as handle_get_recovery_candidate,
    get_run::handle as handle_get_run, get_status::handle as handle_get_status,
    list_outcomes::handle as handle_list_outcomes, GetRecoveryCandidateQuery, GetRunQuery,
    GetStatusQuery, ListOutcomesQuery,
};
use crate::error::AppError;
use crate::ingest::models::IngestionRun;
use crate::ingest::IngestService;

const SSE_KEEP_ALIVE_SECS: u64 = 15;

pub fn ingestion_routes() -> Router<IngestService> {
    Router::new()
        .route("/runs", post(start_run))
        .route("/runs/:run_id", get(get_run))
        .route("/runs/:run_id/resume", post(resume_run))
        .route("/runs/:run_id/cancel", post(cancel_run))
        .route("/runs/:run_id/events", get(run_events))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/status", get(get_status))
        .route("/outcomes", get(list_outcomes))
        .route("/recovery-candidate", get(get_recovery_candidate))
}

/// Start a run
///
/// POST /runs  `{"schedule_id": 3}` or `{}`
async fn start_run(
    State(service): State<IngestService>,
    command: Option<Json<StartRunCommand>>,
) -> Result<Response, AppError> {
    let command = command.map(|Json(c)| c).unwrap_or_default();
    let response = handle_start_run(service, command).await?;
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

/// POST /runs/:run_id/resume
async fn resume_run(
    State(service): State<IngestService>,
    Path(run_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let response = handle_resume_run(service, ResumeRunCommand { run_id }).await?;
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

/// POST /runs/:run_id/cancel
async fn cancel_run(
    State(service): State<IngestService>,
    Path(run_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let response = handle_cancel_run(service, CancelRunCommand { run_id }).await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}

async fn pause(State(service): State<IngestService>) -> Result<Response, AppError> {
    let response = handle_set_paused(service, SetPausedCommand { paused: true }).await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}

async fn resume(State(service): State<IngestService>) -> Result<Response, AppError> {
    let response = handle_set_paused(service, SetPausedCommand { paused: false }).await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}

async fn get_status(State(service): State<IngestService>) -> Result<Response, AppError> {
    let status = handle_get_status(service, GetStatusQuery).await?;
    Ok((StatusCode::OK, Json(status)).into_response())
}

/// GET /runs/:run_id
async fn get_run(
    State(service): State<IngestService>,
    Path(run_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let run = handle_get_run(service, GetRunQuery { run_id }).await?;
    Ok((StatusCode::OK, Json(run)).into_response())
}

/// List file outcomes
///
/// GET /outcomes?status=error&trigger_source=manual&from=...&to=...&run_id=...&limit=50&offset=0
async fn list_outcomes(
    State(service): State<IngestService>,
    Query(query): Query<ListOutcomesQuery>,
) -> Result<Response, AppError> {
    let response = handle_list_outcomes(service, query).await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}

/// GET /recovery-candidate; `null` when nothing is interrupted
async fn get_recovery_candidate(State(service): State<IngestService>) -> Result<Response, AppError> {
    let candidate = handle_get_recovery_candidate(service, GetRecoveryCandidateQuery).await?;
    Ok((StatusCode::OK, Json(candidate)).into_response())
}

/// Progress feed of one run
///
/// GET /runs/:run_id/events
///
/// Opens with a `snapshot` event carrying the run row. A finished or
/// interrupted run ends the stream right there; otherwise progress events
/// follow until the run's final event.
async fn run_events(
    State(service): State<IngestService>,
    Path(run_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let run = handle_get_run(service.clone(), GetRunQuery { run_id }).await?;
    let receiver = if run.status.has_live_feed() {
        Some(service.subscribe(run_id).await)
    } else {
        None
    };

    let events = snapshot_event(&run).chain(progress_events(receiver));
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS)))
        .into_response())
}

fn snapshot_event(run: &IngestionRun) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::once(std::future::ready(Event::default().event("snapshot").json_data(run)))
}

fn progress_events(
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(receiver, |receiver| async move {
        let mut receiver = receiver?;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let sse = Event::default().event(event.stage.as_str()).json_data(&event);
                    let next = (!event.stage.is_final()).then_some(receiver);
                    return Some((sse, next));
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress subscriber lagged");
                },
                Err(RecvError::Closed) => return None,
            }
        }
    })
}
