//! Pause / resume command
//!
//! Flips the shared pause flag. A run checks it at each file boundary.

use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::ingest::{IngestResult, IngestService};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SetPausedCommand {
    pub paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPausedResponse {
    pub paused: bool,
}

impl Request<IngestResult<SetPausedResponse>> for SetPausedCommand {}

pub async fn handle(service: IngestService, command: SetPausedCommand) -> IngestResult<SetPausedResponse> {
    if command.paused {
        service.pause().await?;
    } else {
        service.resume().await?;
    }
    Ok(SetPausedResponse {
        paused: command.paused,
    })
}
