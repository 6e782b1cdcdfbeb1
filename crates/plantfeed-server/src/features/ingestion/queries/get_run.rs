//! Get run query
//!
//! Returns the durable run row. Unknown ids surface as `RunNotFound`.

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::models::IngestionRun;
use crate::ingest::{IngestResult, IngestService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRunQuery {
    pub run_id: Uuid,
}

impl Request<IngestResult<IngestionRun>> for GetRunQuery {}

pub async fn handle(service: IngestService, query: GetRunQuery) -> IngestResult<IngestionRun> {
    service.get_run(query.run_id).await
}
