//! Get ingestion status query

use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::ingest::service::StatusSnapshot;
use crate::ingest::{IngestResult, IngestService};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetStatusQuery;

impl Request<IngestResult<StatusSnapshot>> for GetStatusQuery {}

pub async fn handle(service: IngestService, _query: GetStatusQuery) -> IngestResult<StatusSnapshot> {
    service.status().await
}
