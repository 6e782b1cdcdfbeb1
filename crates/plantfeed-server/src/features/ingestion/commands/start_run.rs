//! Start run command
//!
//! Starts a manual run, or a scheduled one when a schedule id is given.
//! Fails fast with `LockContention` while another run holds the lock.

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::{IngestResult, IngestService};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRunCommand {
    #[serde(default)]
    pub schedule_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRunResponse {
    pub run_id: Uuid,
}

impl Request<IngestResult<StartRunResponse>> for StartRunCommand {}

pub async fn handle(service: IngestService, command: StartRunCommand) -> IngestResult<StartRunResponse> {
    let run_id = match command.schedule_id {
        Some(schedule_id) => service.start_scheduled_run(schedule_id).await?,
        None => service.start_manual_run().await?,
    };
    Ok(StartRunResponse { run_id })
}
