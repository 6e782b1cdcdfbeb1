//! Get recovery candidate query
//!
//! The most recently interrupted run, with its snapshot when one survived.

use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::ingest::service::RecoveryCandidate;
use crate::ingest::{IngestResult, IngestService};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetRecoveryCandidateQuery;

impl Request<IngestResult<Option<RecoveryCandidate>>> for GetRecoveryCandidateQuery {}

pub async fn handle(
    service: IngestService,
    _query: GetRecoveryCandidateQuery,
) -> IngestResult<Option<RecoveryCandidate>> {
    service.recovery_candidate().await
}
