//! Resume interrupted run command

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::start_run::StartRunResponse;
use crate::ingest::{IngestResult, IngestService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRunCommand {
    pub run_id: Uuid,
}

impl Request<IngestResult<StartRunResponse>> for ResumeRunCommand {}

pub async fn handle(service: IngestService, command: ResumeRunCommand) -> IngestResult<StartRunResponse> {
    let run_id = service.resume_interrupted(command.run_id).await?;
    Ok(StartRunResponse { run_id })
}
