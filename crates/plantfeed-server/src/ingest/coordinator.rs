//! Run coordinator
//!
//! Drives one attempt of an ingestion run:
//! 1. Connect to the remote source
//! 2. Discover files (fresh run) or take the checkpoint's remaining list
//! 3. Process files sequentially in chunks, checkpointing after each one
//! 4. Clean up: close the session, release the lock, discard the checkpoint
//!
//! The caller acquires the run lock before [`RunCoordinator::execute`];
//! retries and final run status on failure belong to the supervisor in
//! [`super::service`].

use plantfeed_common::types::{ProgressEvent, ProgressStage, RunStatus, TriggerSource};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::RunConfig;
use super::coordination::Coordination;
use super::error::{IngestError, IngestResult};
use super::extractor::has_extension;
use super::models::{Checkpoint, RunProgress};
use super::persistence::{RecordStore, RunLedger};
use super::processor::{self, FileContext};
use super::progress::ProgressSender;
use super::source::{RemoteSession, RemoteSource};

/// What to run and where to start.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: Uuid,
    pub trigger_source: TriggerSource,
    pub schedule_id: Option<i64>,
    pub remote_path: String,
    /// Skip discovery and process exactly these remaining files.
    pub resume_from: Option<Checkpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub total_files: i64,
    pub processed_files: i64,
    pub records_extracted: i64,
}

/// A failed attempt and the point a retry should resume from.
#[derive(Debug)]
pub struct RunFailure {
    pub error: IngestError,
    pub checkpoint: Option<Checkpoint>,
}

/// Counters of the attempt in flight.
#[derive(Debug, Clone, Default)]
struct RunState {
    processed: i64,
    total: i64,
    records: i64,
    last_file: Option<String>,
    /// `None` until the file list is known.
    remaining: Option<VecDeque<String>>,
}

impl RunState {
    fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            processed: checkpoint.processed_count,
            total: checkpoint.total_files(),
            records: checkpoint.records_extracted,
            last_file: checkpoint.last_processed_file.clone(),
            remaining: Some(checkpoint.remaining_files.iter().cloned().collect()),
        }
    }

    fn with_files(files: Vec<String>) -> Self {
        Self {
            total: files.len() as i64,
            remaining: Some(files.into()),
            ..Default::default()
        }
    }

    fn advance(&mut self, file: &str, records: i64) {
        if let Some(remaining) = self.remaining.as_mut() {
            if remaining.front().map(String::as_str) == Some(file) {
                remaining.pop_front();
            }
        }
        self.processed += 1;
        self.records += records;
        self.last_file = Some(file.to_string());
    }

    fn checkpoint(&self) -> Option<Checkpoint> {
        self.remaining.as_ref().map(|remaining| Checkpoint {
            last_processed_file: self.last_file.clone(),
            processed_count: self.processed,
            remaining_files: remaining.iter().cloned().collect(),
            records_extracted: self.records,
        })
    }

    fn progress(&self, current_file: Option<&str>) -> RunProgress {
        RunProgress {
            total_files: self.total,
            processed_files: self.processed,
            current_file: current_file.map(str::to_string).or_else(|| self.last_file.clone()),
            records_extracted: self.records,
        }
    }
}

#[derive(Clone)]
pub struct RunCoordinator {
    source: Arc<dyn RemoteSource>,
    records: Arc<dyn RecordStore>,
    runs: Arc<dyn RunLedger>,
    coordination: Coordination,
    progress: ProgressSender,
    config: RunConfig,
}

impl RunCoordinator {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        records: Arc<dyn RecordStore>,
        runs: Arc<dyn RunLedger>,
        coordination: Coordination,
        progress: ProgressSender,
        config: RunConfig,
    ) -> Self {
        Self {
            source,
            records,
            runs,
            coordination,
            progress,
            config,
        }
    }

    pub fn coordination(&self) -> &Coordination {
        &self.coordination
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn runs(&self) -> &Arc<dyn RunLedger> {
        &self.runs
    }

    pub fn progress(&self) -> &ProgressSender {
        &self.progress
    }

    /// Run one attempt. The lock must already be held for `request.run_id`;
    /// it is released before this returns, whatever the result.
    pub async fn execute(&self, request: &RunRequest) -> Result<RunSummary, RunFailure> {
        let mut state = request
            .resume_from
            .as_ref()
            .map(RunState::from_checkpoint)
            .unwrap_or_default();

        let result = self.drive(request, &mut state).await;
        let checkpoint = state.checkpoint().or_else(|| request.resume_from.clone());
        self.cleanup(request.run_id).await;

        match result {
            Ok(()) => Ok(RunSummary {
                run_id: request.run_id,
                total_files: state.total,
                processed_files: state.processed,
                records_extracted: state.records,
            }),
            Err(error) => Err(RunFailure { error, checkpoint }),
        }
    }

    async fn drive(&self, request: &RunRequest, state: &mut RunState) -> IngestResult<()> {
        let run_id = request.run_id;
        let started = Instant::now();

        self.runs.update_status(run_id, RunStatus::Processing, None).await?;
        info!(
            run_id = %run_id,
            trigger = %request.trigger_source,
            remote_path = %request.remote_path,
            resuming = request.resume_from.is_some(),
            "Starting ingestion run"
        );

        let mut session = self.source.connect(&request.remote_path).await?;
        let result = self.process_all(request, session.as_mut(), state, started).await;
        session.close().await;
        result?;

        self.runs.update_progress(run_id, &state.progress(None)).await?;
        self.runs.update_status(run_id, RunStatus::Completed, None).await?;

        let message = format!(
            "Processed {} files, {} records extracted",
            state.processed, state.records
        );
        info!(run_id = %run_id, files = state.processed, records = state.records, "Ingestion run completed");
        self.progress.publish(
            ProgressEvent::new(run_id, ProgressStage::Completed, message)
                .with_counts(state.processed, state.total, state.records),
        );
        Ok(())
    }

    async fn process_all(
        &self,
        request: &RunRequest,
        session: &mut dyn RemoteSession,
        state: &mut RunState,
        started: Instant,
    ) -> IngestResult<()> {
        let run_id = request.run_id;

        if state.remaining.is_none() {
            let files = self.discover(session).await?;
            *state = RunState::with_files(files);
        }
        let files: Vec<String> = state
            .remaining
            .as_ref()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();

        self.runs.update_progress(run_id, &state.progress(None)).await?;
        self.progress.publish(
            ProgressEvent::new(run_id, ProgressStage::Started, format!("{} files to process", files.len()))
                .with_counts(state.processed, state.total, state.records),
        );

        let ctx = FileContext {
            run_id,
            trigger_source: request.trigger_source,
            schedule_id: request.schedule_id,
            file_extension: self.config.file_extension.clone(),
        };

        for (index, chunk) in files.chunks(self.config.chunk_size.max(1)).enumerate() {
            debug!(run_id = %run_id, chunk = index + 1, size = chunk.len(), "Processing chunk");

            for file_name in chunk {
                self.between_files(run_id, state, started).await?;

                self.runs.update_progress(run_id, &state.progress(Some(file_name))).await?;
                let location = self.source.file_location(&request.remote_path, file_name);
                let processed =
                    processor::process_file(session, self.records.as_ref(), &ctx, file_name, &location)
                        .await?;

                state.advance(file_name, i64::from(processed.report.records_created()));
                self.runs.update_progress(run_id, &state.progress(None)).await?;
                if let Some(checkpoint) = state.checkpoint() {
                    self.coordination.save_checkpoint(run_id, &checkpoint).await?;
                }

                self.progress.publish(
                    ProgressEvent::new(
                        run_id,
                        ProgressStage::FileProcessed,
                        format!("{} {}", file_name, processed.outcome.status),
                    )
                    .with_file(file_name.as_str())
                    .with_counts(state.processed, state.total, state.records),
                );
            }
        }

        Ok(())
    }

    /// List, keep files with the expected extension, drop anything already
    /// settled by an earlier run.
    async fn discover(&self, session: &mut dyn RemoteSession) -> IngestResult<Vec<String>> {
        let listed = session.list().await?;
        let mut seen = HashSet::new();
        let candidates: Vec<String> = listed
            .into_iter()
            .map(|f| f.name)
            .filter(|name| has_extension(name, &self.config.file_extension))
            .filter(|name| seen.insert(name.clone()))
            .collect();

        let settled = self.records.settled_file_names(&candidates).await?;
        let files: Vec<String> = candidates
            .into_iter()
            .filter(|name| !settled.contains(name))
            .collect();

        info!(new = files.len(), already_done = settled.len(), "Discovered files");
        Ok(files)
    }

    /// File boundary: time budget, cancellation, ownership and pause.
    async fn between_files(&self, run_id: Uuid, state: &RunState, started: Instant) -> IngestResult<()> {
        if started.elapsed() >= self.config.soft_time_limit() {
            warn!(run_id = %run_id, "Soft time limit reached");
            return Err(IngestError::RunTimeout(self.config.soft_time_limit_secs));
        }

        self.ensure_still_owner(run_id).await?;

        if self.coordination.is_paused().await? {
            self.wait_while_paused(run_id, state).await?;
        }
        Ok(())
    }

    async fn ensure_still_owner(&self, run_id: Uuid) -> IngestResult<()> {
        if self.coordination.is_cancel_requested(run_id).await? {
            info!(run_id = %run_id, "Cancellation requested");
            return Err(IngestError::Cancelled(run_id));
        }
        if !self.coordination.refresh_lock(run_id).await? {
            info!(run_id = %run_id, "Run lock lost");
            return Err(IngestError::Superseded(run_id));
        }
        match self.coordination.current_run().await? {
            Some(current) if current != run_id => {
                info!(run_id = %run_id, newer = %current, "A newer run took over");
                Err(IngestError::Superseded(run_id))
            },
            _ => Ok(()),
        }
    }

    async fn wait_while_paused(&self, run_id: Uuid, state: &RunState) -> IngestResult<()> {
        info!(run_id = %run_id, "Run paused");
        self.runs.update_status(run_id, RunStatus::Paused, None).await?;
        self.progress.publish(
            ProgressEvent::new(run_id, ProgressStage::Paused, "Paused")
                .with_counts(state.processed, state.total, state.records),
        );

        let paused_at = Instant::now();
        loop {
            tokio::time::sleep(self.config.pause_poll_interval()).await;
            self.runs.touch(run_id).await?;
            self.ensure_still_owner(run_id).await?;

            if !self.coordination.is_paused().await? {
                break;
            }
            if paused_at.elapsed() >= self.config.pause_ceiling() {
                warn!(run_id = %run_id, "Pause ceiling reached");
                return Err(IngestError::PauseTimeout(self.config.pause_ceiling_secs));
            }
        }

        info!(run_id = %run_id, "Run resumed");
        self.runs.update_status(run_id, RunStatus::Processing, None).await?;
        self.progress.publish(
            ProgressEvent::new(run_id, ProgressStage::Resumed, "Resumed")
                .with_counts(state.processed, state.total, state.records),
        );
        Ok(())
    }

    /// Best-effort: problems are logged.
    async fn cleanup(&self, run_id: Uuid) {
        if let Err(e) = self.coordination.release_lock(run_id).await {
            warn!(run_id = %run_id, error = %e, "Failed to release run lock");
        }
        if let Err(e) = self.coordination.discard_checkpoint(run_id).await {
            warn!(run_id = %run_id, error = %e, "Failed to discard checkpoint");
        }
    }
}
