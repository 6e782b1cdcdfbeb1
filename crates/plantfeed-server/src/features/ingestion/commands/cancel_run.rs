//! Cancel run command
//!
//! Cancellation is cooperative: an active run stops at its next file
//! boundary. Cancelling a finished run is a no-op reported as
//! `cancelled: false`.

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::{IngestResult, IngestService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRunCommand {
    pub run_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRunResponse {
    pub run_id: Uuid,
    pub cancelled: bool,
}

impl Request<IngestResult<CancelRunResponse>> for CancelRunCommand {}

pub async fn handle(service: IngestService, command: CancelRunCommand) -> IngestResult<CancelRunResponse> {
    let cancelled = service.cancel(command.run_id).await?;
    Ok(CancelRunResponse {
        run_id: command.run_id,
        cancelled,
    })
}
