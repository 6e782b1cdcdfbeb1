//! In-memory doubles for the remote source and the stores, shared by the
//! unit tests of the processor, coordinator, service and recovery monitor.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use plantfeed_common::types::{FileOutcomeStatus, RunStatus, TriggerSource};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use super::error::{IngestError, IngestResult};
use super::models::{
    AggregateKey, AggregateKind, AggregateRecord, BatchEvent, BatchInsert, BatchKey, FileOutcome,
    IngestionRun, NewFileOutcome, NewRun, OutcomeFilter, RunProgress, ScheduleDefinition,
};
use super::persistence::{RecordStore, RunLedger};
use super::source::{RemoteFile, RemoteSession, RemoteSource};

// ============================================================================
// Remote
// ============================================================================

#[derive(Default)]
struct RemoteLog {
    connects: usize,
    downloads: Vec<String>,
}

/// Files served from memory, in insertion order.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    files: Vec<(String, Vec<u8>)>,
    unreachable: bool,
    download_delay: Option<Duration>,
    log: Arc<Mutex<RemoteLog>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: &str, body: &str) -> Self {
        self.files.push((name.to_string(), body.as_bytes().to_vec()));
        self
    }

    /// Every connect fails.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = Some(delay);
        self
    }

    /// A `BatchLogs` document with one batch per number, job 100, one minute
    /// apart.
    pub fn batch_report(batch_numbers: &[i64]) -> String {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        let batches: String = batch_numbers
            .iter()
            .map(|n| {
                let time = start + chrono::Duration::minutes(*n);
                format!(
                    "<BatchLog><BatchNo>{n}</BatchNo><Time>{}</Time><JobNo>100</JobNo>\
                     <RecipeNo>3</RecipeNo><RecipeName>AC14</RecipeName>\
                     <Bitumen><Actual>52.5</Actual><Target>53</Target></Bitumen></BatchLog>",
                    time.format("%Y-%m-%dT%H:%M:%S")
                )
            })
            .collect();
        format!("<BatchLogs>{batches}</BatchLogs>")
    }

    pub fn session(&self) -> MemorySession {
        MemorySession {
            remote: self.clone(),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.log.lock().unwrap().connects
    }

    pub fn download_count(&self) -> usize {
        self.log.lock().unwrap().downloads.len()
    }

    /// Names downloaded so far, in order.
    pub fn downloaded(&self) -> Vec<String> {
        self.log.lock().unwrap().downloads.clone()
    }
}

#[async_trait]
impl RemoteSource for MemoryRemote {
    async fn connect(&self, remote_path: &str) -> IngestResult<Box<dyn RemoteSession>> {
        self.log.lock().unwrap().connects += 1;
        if self.unreachable {
            return Err(IngestError::ConnectionFailed(format!(
                "memory remote unreachable for {remote_path}"
            )));
        }
        Ok(Box::new(self.session()))
    }

    fn file_location(&self, remote_path: &str, file_name: &str) -> String {
        format!("memory://{}/{file_name}", remote_path.trim_matches('/'))
    }
}

pub struct MemorySession {
    remote: MemoryRemote,
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn list(&mut self) -> IngestResult<Vec<RemoteFile>> {
        Ok(self
            .remote
            .files
            .iter()
            .map(|(name, body)| RemoteFile {
                name: name.clone(),
                size: Some(body.len() as u64),
                modified_at: None,
            })
            .collect())
    }

    async fn download(&mut self, file_name: &str) -> IngestResult<Vec<u8>> {
        if let Some(delay) = self.remote.download_delay {
            tokio::time::sleep(delay).await;
        }
        self.remote.log.lock().unwrap().downloads.push(file_name.to_string());
        self.remote
            .files
            .iter()
            .find(|(name, _)| name == file_name)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| IngestError::DownloadFailed {
                file: file_name.to_string(),
                reason: "no such file".into(),
            })
    }

    async fn close(self: Box<Self>) {}
}

// ============================================================================
// Stores
// ============================================================================

#[derive(Default)]
struct StoreState {
    batches: HashSet<BatchKey>,
    aggregates: HashMap<AggregateKey, AggregateRecord>,
    outcomes: Vec<FileOutcome>,
    runs: HashMap<Uuid, IngestionRun>,
    run_order: Vec<Uuid>,
    schedules: HashMap<i64, ScheduleDefinition>,
}

/// Record store and run ledger in one, mirroring `PgStore`.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_count(&self) -> usize {
        self.state.lock().unwrap().batches.len()
    }

    pub fn aggregate_count(&self, kind: AggregateKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .aggregates
            .keys()
            .filter(|k| k.kind == kind)
            .count()
    }

    /// All outcomes in the order they were recorded.
    pub fn outcomes(&self) -> Vec<FileOutcome> {
        self.state.lock().unwrap().outcomes.clone()
    }

    pub fn add_schedule(&self, schedule: ScheduleDefinition) {
        self.state.lock().unwrap().schedules.insert(schedule.id, schedule);
    }

    /// Move `last_updated_at` into the past.
    pub fn backdate_run(&self, run_id: Uuid, age: chrono::Duration) {
        if let Some(run) = self.state.lock().unwrap().runs.get_mut(&run_id) {
            run.last_updated_at = Utc::now() - age;
        }
    }

    pub fn seed_success_outcome(&self, run_id: Uuid, file_name: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state.outcomes.len() as i64 + 1;
        state.outcomes.push(FileOutcome {
            id,
            file_name: file_name.to_string(),
            file_type: "XML".into(),
            remote_path: format!("memory://reports/{file_name}"),
            recorded_at: Utc::now(),
            status: FileOutcomeStatus::Success,
            error_message: None,
            trigger_source: TriggerSource::Manual,
            schedule_id: None,
            run_id: Some(run_id),
        });
    }

    fn with_run(&self, run_id: Uuid, update: impl FnOnce(&mut IngestionRun)) -> IngestResult<()> {
        let mut state = self.state.lock().unwrap();
        let run = state.runs.get_mut(&run_id).ok_or(IngestError::RunNotFound(run_id))?;
        update(run);
        run.last_updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_batch_event(&self, event: &BatchEvent) -> IngestResult<BatchInsert> {
        let inserted = self.state.lock().unwrap().batches.insert(event.key());
        Ok(if inserted {
            BatchInsert::Inserted
        } else {
            BatchInsert::Duplicate
        })
    }

    async fn upsert_aggregate(&self, record: &AggregateRecord) -> IngestResult<bool> {
        let previous = self
            .state
            .lock()
            .unwrap()
            .aggregates
            .insert(record.key(), record.clone());
        Ok(previous.is_none())
    }

    async fn record_file_outcome(&self, outcome: &NewFileOutcome) -> IngestResult<FileOutcome> {
        let mut state = self.state.lock().unwrap();
        let row = FileOutcome {
            id: state.outcomes.len() as i64 + 1,
            file_name: outcome.file_name.clone(),
            file_type: outcome.file_type.clone(),
            remote_path: outcome.remote_path.clone(),
            recorded_at: Utc::now(),
            status: outcome.status,
            error_message: outcome.error_message.clone(),
            trigger_source: outcome.trigger_source,
            schedule_id: outcome.schedule_id,
            run_id: outcome.run_id,
        };
        state.outcomes.push(row.clone());
        Ok(row)
    }

    async fn settled_file_names(&self, names: &[String]) -> IngestResult<HashSet<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .outcomes
            .iter()
            .filter(|o| matches!(o.status, FileOutcomeStatus::Success | FileOutcomeStatus::Skipped))
            .filter(|o| names.contains(&o.file_name))
            .map(|o| o.file_name.clone())
            .collect())
    }

    async fn list_file_outcomes(&self, filter: &OutcomeFilter) -> IngestResult<Vec<FileOutcome>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<FileOutcome> = state
            .outcomes
            .iter()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then(b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn count_success_outcomes(&self, run_id: Uuid) -> IngestResult<i64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .outcomes
            .iter()
            .filter(|o| o.run_id == Some(run_id) && o.status == FileOutcomeStatus::Success)
            .count() as i64)
    }
}

#[async_trait]
impl RunLedger for MemoryStore {
    async fn create_run(&self, run: &NewRun) -> IngestResult<IngestionRun> {
        let now = Utc::now();
        let row = IngestionRun {
            id: run.id,
            status: RunStatus::Pending,
            trigger_source: run.trigger_source,
            schedule_id: run.schedule_id,
            remote_path: run.remote_path.clone(),
            total_files: 0,
            processed_files: 0,
            current_file: None,
            records_extracted: 0,
            attempt: 0,
            error_message: None,
            created_at: now,
            last_updated_at: now,
        };
        let mut state = self.state.lock().unwrap();
        state.runs.insert(run.id, row.clone());
        state.run_order.push(run.id);
        Ok(row)
    }

    async fn get_run(&self, run_id: Uuid) -> IngestResult<Option<IngestionRun>> {
        Ok(self.state.lock().unwrap().runs.get(&run_id).cloned())
    }

    async fn latest_run(&self) -> IngestResult<Option<IngestionRun>> {
        let state = self.state.lock().unwrap();
        Ok(state.run_order.last().and_then(|id| state.runs.get(id)).cloned())
    }

    async fn latest_interrupted_run(&self) -> IngestResult<Option<IngestionRun>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .runs
            .values()
            .filter(|r| r.status == RunStatus::Interrupted)
            .max_by_key(|r| r.last_updated_at)
            .cloned())
    }

    async fn update_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> IngestResult<()> {
        self.with_run(run_id, |run| {
            run.status = status;
            run.error_message = error_message.map(str::to_string);
        })
    }

    async fn update_progress(&self, run_id: Uuid, progress: &RunProgress) -> IngestResult<()> {
        self.with_run(run_id, |run| {
            run.total_files = progress.total_files;
            run.processed_files = progress.processed_files;
            run.current_file = progress.current_file.clone();
            run.records_extracted = progress.records_extracted;
        })
    }

    async fn set_attempt(&self, run_id: Uuid, attempt: i32) -> IngestResult<()> {
        self.with_run(run_id, |run| run.attempt = attempt)
    }

    async fn touch(&self, run_id: Uuid) -> IngestResult<()> {
        self.with_run(run_id, |_| {})
    }

    async fn find_stale_runs(
        &self,
        statuses: &[RunStatus],
        before: chrono::DateTime<Utc>,
    ) -> IngestResult<Vec<IngestionRun>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .runs
            .values()
            .filter(|r| statuses.contains(&r.status) && r.last_updated_at < before)
            .cloned()
            .collect())
    }

    async fn get_schedule(&self, schedule_id: i64) -> IngestResult<Option<ScheduleDefinition>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .schedules
            .get(&schedule_id)
            .filter(|s| s.is_active)
            .cloned())
    }
}
