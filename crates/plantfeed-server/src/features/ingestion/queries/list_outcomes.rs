//! List file outcomes query
//!
//! Newest first, filtered by status, trigger source, time window and run.

use chrono::{DateTime, Utc};
use mediator::Request;
use plantfeed_common::types::{FileOutcomeStatus, TriggerSource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::models::{FileOutcome, OutcomeFilter};
use crate::ingest::{IngestResult, IngestService};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOutcomesQuery {
    pub status: Option<FileOutcomeStatus>,
    pub trigger_source: Option<TriggerSource>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub run_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<ListOutcomesQuery> for OutcomeFilter {
    fn from(query: ListOutcomesQuery) -> Self {
        OutcomeFilter {
            status: query.status,
            trigger_source: query.trigger_source,
            from: query.from,
            to: query.to,
            run_id: query.run_id,
            limit: query.limit,
            offset: query.offset,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOutcomesResponse {
    pub outcomes: Vec<FileOutcome>,
    pub limit: i64,
    pub offset: i64,
}

impl Request<IngestResult<ListOutcomesResponse>> for ListOutcomesQuery {}

pub async fn handle(service: IngestService, query: ListOutcomesQuery) -> IngestResult<ListOutcomesResponse> {
    let filter = OutcomeFilter::from(query);
    let outcomes = service.list_outcomes(&filter).await?;
    Ok(ListOutcomesResponse {
        outcomes,
        limit: filter.limit(),
        offset: filter.offset(),
    })
}
