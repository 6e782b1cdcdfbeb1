//! Persistence seams
//!
//! [`RecordStore`] holds extracted records and file outcomes; [`RunLedger`]
//! holds the durable run rows the recovery monitor sweeps. Both are
//! implemented by [`PgStore`]. There is no run-wide transaction: every
//! record write commits on its own so partial progress survives a crash.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use plantfeed_common::types::RunStatus;
use std::collections::HashSet;
use uuid::Uuid;

use super::error::IngestResult;
use super::models::{
    AggregateRecord, BatchEvent, BatchInsert, FileOutcome, IngestionRun, NewFileOutcome, NewRun,
    OutcomeFilter, RunProgress, ScheduleDefinition,
};

pub use postgres::PgStore;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the event unless one with the same natural key exists.
    async fn create_batch_event(&self, event: &BatchEvent) -> IngestResult<BatchInsert>;

    /// Insert or update by `(date, secondary key)`. Returns `true` when a new
    /// row was created.
    async fn upsert_aggregate(&self, record: &AggregateRecord) -> IngestResult<bool>;

    async fn record_file_outcome(&self, outcome: &NewFileOutcome) -> IngestResult<FileOutcome>;

    /// Names among `names` that already have a `success` or `skipped`
    /// outcome in any run.
    async fn settled_file_names(&self, names: &[String]) -> IngestResult<HashSet<String>>;

    async fn list_file_outcomes(&self, filter: &OutcomeFilter) -> IngestResult<Vec<FileOutcome>>;

    async fn count_success_outcomes(&self, run_id: Uuid) -> IngestResult<i64>;
}

#[async_trait]
pub trait RunLedger: Send + Sync {
    async fn create_run(&self, run: &NewRun) -> IngestResult<IngestionRun>;

    async fn get_run(&self, run_id: Uuid) -> IngestResult<Option<IngestionRun>>;

    /// Most recently created run.
    async fn latest_run(&self) -> IngestResult<Option<IngestionRun>>;

    /// Most recently updated run in `interrupted` state.
    async fn latest_interrupted_run(&self) -> IngestResult<Option<IngestionRun>>;

    async fn update_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> IngestResult<()>;

    async fn update_progress(&self, run_id: Uuid, progress: &RunProgress) -> IngestResult<()>;

    async fn set_attempt(&self, run_id: Uuid, attempt: i32) -> IngestResult<()>;

    /// Bump `last_updated_at` without changing anything else.
    async fn touch(&self, run_id: Uuid) -> IngestResult<()>;

    /// Runs in one of `statuses` not updated since `before`.
    async fn find_stale_runs(
        &self,
        statuses: &[RunStatus],
        before: DateTime<Utc>,
    ) -> IngestResult<Vec<IngestionRun>>;

    /// Active schedule by id.
    async fn get_schedule(&self, schedule_id: i64) -> IngestResult<Option<ScheduleDefinition>>;
}
