//! Ingestion service: trigger and query interface
//!
//! Starting a run takes the run lock synchronously, so contention is
//! reported to the caller before anything changes. The run itself executes
//! in a spawned supervisor task that applies the [`RetryPolicy`] around
//! whole coordinator attempts.

use plantfeed_common::types::{ProgressEvent, ProgressStage, RunStatus, TriggerSource};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::config::IngestConfig;
use super::coordination::{Coordination, PgCoordinationStore};
use super::coordinator::{RunCoordinator, RunRequest};
use super::error::{IngestError, IngestResult};
use super::models::{Checkpoint, FileOutcome, IngestionRun, NewRun, OutcomeFilter, RecoverySnapshot};
use super::persistence::{PgStore, RecordStore, RunLedger};
use super::progress::{ProgressPublisher, DEFAULT_TOPIC_CAPACITY};
use super::retry::RetryPolicy;
use super::source::FtpSource;

/// Point-in-time view for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub paused: bool,
    /// Run currently holding the lock
    pub active_run_id: Option<Uuid>,
    /// Most recently started run according to the shared marker
    pub current_run_id: Option<Uuid>,
    pub latest_run: Option<IngestionRun>,
}

/// Last interrupted run and what is known about where it stopped.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryCandidate {
    pub run: IngestionRun,
    pub snapshot: Option<RecoverySnapshot>,
    pub resumable: bool,
}

#[derive(Clone)]
pub struct IngestService {
    inner: Arc<Inner>,
}

struct Inner {
    coordinator: RunCoordinator,
    publisher: Arc<ProgressPublisher>,
    retry: RetryPolicy,
    default_remote_path: String,
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl IngestService {
    pub fn new(
        coordinator: RunCoordinator,
        publisher: Arc<ProgressPublisher>,
        retry: RetryPolicy,
        default_remote_path: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                coordinator,
                publisher,
                retry,
                default_remote_path: default_remote_path.into(),
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// FTP source with PostgreSQL-backed records, runs and coordination.
    pub fn postgres(pool: PgPool, config: &IngestConfig) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        let coordination = Coordination::new(Arc::new(PgCoordinationStore::new(pool)), &config.run);
        let (publisher, sender) = ProgressPublisher::start(DEFAULT_TOPIC_CAPACITY);
        let coordinator = RunCoordinator::new(
            Arc::new(FtpSource::new(config.source.clone())),
            store.clone(),
            store,
            coordination,
            sender,
            config.run.clone(),
        );
        Self::new(coordinator, publisher, config.retry.policy(), config.source.remote_dir.clone())
    }

    pub(crate) fn coordination(&self) -> &Coordination {
        self.inner.coordinator.coordination()
    }

    pub(crate) fn runs(&self) -> &Arc<dyn RunLedger> {
        self.inner.coordinator.runs()
    }

    pub(crate) fn records(&self) -> &Arc<dyn RecordStore> {
        self.inner.coordinator.records()
    }

    pub(crate) fn publish(&self, event: ProgressEvent) {
        self.inner.publish(event);
    }

    // ------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------

    pub async fn start_manual_run(&self) -> IngestResult<Uuid> {
        let remote_path = self.inner.default_remote_path.clone();
        self.begin(TriggerSource::Manual, None, remote_path, true).await
    }

    /// Run against the schedule's remote path.
    pub async fn start_scheduled_run(&self, schedule_id: i64) -> IngestResult<Uuid> {
        let schedule = self
            .runs()
            .get_schedule(schedule_id)
            .await?
            .ok_or(IngestError::ScheduleNotFound(schedule_id))?;

        let remote_path = if schedule.remote_path.trim().is_empty() {
            self.inner.default_remote_path.clone()
        } else {
            schedule.remote_path
        };
        self.begin(TriggerSource::Scheduled, Some(schedule_id), remote_path, false)
            .await
    }

    /// Restart an interrupted (or failed) run under its own id from its
    /// checkpoint or recovery snapshot.
    pub async fn resume_interrupted(&self, run_id: Uuid) -> IngestResult<Uuid> {
        let run = self
            .runs()
            .get_run(run_id)
            .await?
            .ok_or(IngestError::RunNotFound(run_id))?;
        if run.status.is_active() || run.status == RunStatus::Completed {
            return Err(IngestError::NothingToResume(run_id));
        }

        let checkpoint = match self.coordination().load_checkpoint(run_id).await? {
            Some(checkpoint) => Some(checkpoint),
            None => self
                .coordination()
                .load_recovery_snapshot(run_id)
                .await?
                .and_then(|s| s.to_checkpoint()),
        };
        let checkpoint = checkpoint.ok_or(IngestError::NothingToResume(run_id))?;

        self.restart(&run, checkpoint, true).await?;
        self.coordination().discard_recovery_snapshot(run_id).await?;
        Ok(run_id)
    }

    /// Spawn a new supervised attempt of `run` starting at `checkpoint`.
    pub(crate) async fn restart(
        &self,
        run: &IngestionRun,
        checkpoint: Checkpoint,
        clear_pause: bool,
    ) -> IngestResult<()> {
        let coordination = self.coordination();
        coordination.acquire_lock(run.id).await?;

        let prepared = async {
            coordination.clear_cancel(run.id).await?;
            coordination.set_current_run(run.id).await?;
            if clear_pause {
                coordination.set_paused(false).await?;
            }
            self.runs().update_status(run.id, RunStatus::Pending, None).await
        }
        .await;
        if let Err(e) = prepared {
            self.release_after_failed_start(run.id).await;
            return Err(e);
        }

        info!(run_id = %run.id, remaining = checkpoint.remaining_files.len(), "Restarting run from checkpoint");
        let request = RunRequest {
            run_id: run.id,
            trigger_source: run.trigger_source,
            schedule_id: run.schedule_id,
            remote_path: run.remote_path.clone(),
            resume_from: Some(checkpoint),
        };
        self.spawn(request, run.attempt + 1).await;
        Ok(())
    }

    async fn begin(
        &self,
        trigger_source: TriggerSource,
        schedule_id: Option<i64>,
        remote_path: String,
        clear_pause: bool,
    ) -> IngestResult<Uuid> {
        let run_id = Uuid::new_v4();
        let coordination = self.coordination();
        coordination.acquire_lock(run_id).await?;

        let new_run = NewRun {
            id: run_id,
            trigger_source,
            schedule_id,
            remote_path: remote_path.clone(),
        };
        let prepared = async {
            self.runs().create_run(&new_run).await?;
            coordination.set_current_run(run_id).await?;
            if clear_pause {
                coordination.set_paused(false).await?;
            }
            Ok::<_, IngestError>(())
        }
        .await;
        if let Err(e) = prepared {
            self.release_after_failed_start(run_id).await;
            return Err(e);
        }

        info!(run_id = %run_id, trigger = %trigger_source, schedule_id = ?schedule_id, "Ingestion run started");
        let request = RunRequest {
            run_id,
            trigger_source,
            schedule_id,
            remote_path,
            resume_from: None,
        };
        self.spawn(request, 1).await;
        Ok(run_id)
    }

    async fn release_after_failed_start(&self, run_id: Uuid) {
        if let Err(e) = self.coordination().release_lock(run_id).await {
            warn!(run_id = %run_id, error = %e, "Failed to release lock after aborted start");
        }
    }

    async fn spawn(&self, request: RunRequest, first_attempt: i32) {
        let run_id = request.run_id;
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.supervise(request, first_attempt).await });

        let mut tasks = self.inner.tasks.lock().await;
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(run_id, handle);
    }

    /// Wait for the supervisor of `run_id` (started by this service) to finish.
    pub async fn wait(&self, run_id: Uuid) {
        let handle = self.inner.tasks.lock().await.remove(&run_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(run_id = %run_id, error = %e, "Run supervisor panicked");
            }
        }
    }

    pub async fn pause(&self) -> IngestResult<()> {
        info!("Pause requested");
        self.coordination().set_paused(true).await
    }

    pub async fn resume(&self) -> IngestResult<()> {
        info!("Resume requested");
        self.coordination().set_paused(false).await
    }

    /// Ask `run_id` to stop at its next file boundary. Returns `false` when
    /// the run has already finished.
    pub async fn cancel(&self, run_id: Uuid) -> IngestResult<bool> {
        let run = self
            .runs()
            .get_run(run_id)
            .await?
            .ok_or(IngestError::RunNotFound(run_id))?;
        if run.status.is_terminal() {
            return Ok(false);
        }

        info!(run_id = %run_id, "Cancel requested");
        self.coordination().request_cancel(run_id).await?;

        // Nobody is executing an interrupted run; settle it here.
        if run.status == RunStatus::Interrupted {
            self.runs()
                .update_status(run_id, RunStatus::Failed, Some("cancelled"))
                .await?;
            self.coordination().discard_recovery_snapshot(run_id).await?;
            self.coordination().discard_checkpoint(run_id).await?;
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn status(&self) -> IngestResult<StatusSnapshot> {
        let coordination = self.coordination();
        Ok(StatusSnapshot {
            paused: coordination.is_paused().await?,
            active_run_id: coordination.lock_holder().await?,
            current_run_id: coordination.current_run().await?,
            latest_run: self.runs().latest_run().await?,
        })
    }

    pub async fn get_run(&self, run_id: Uuid) -> IngestResult<IngestionRun> {
        self.runs()
            .get_run(run_id)
            .await?
            .ok_or(IngestError::RunNotFound(run_id))
    }

    pub async fn list_outcomes(&self, filter: &OutcomeFilter) -> IngestResult<Vec<FileOutcome>> {
        self.records().list_file_outcomes(filter).await
    }

    pub async fn recovery_candidate(&self) -> IngestResult<Option<RecoveryCandidate>> {
        let Some(run) = self.runs().latest_interrupted_run().await? else {
            return Ok(None);
        };
        let snapshot = self.coordination().load_recovery_snapshot(run.id).await?;
        let resumable = snapshot.as_ref().is_some_and(|s| !s.remaining_files.is_empty())
            || self.coordination().load_checkpoint(run.id).await?.is_some();
        Ok(Some(RecoveryCandidate {
            run,
            snapshot,
            resumable,
        }))
    }

    pub async fn subscribe(&self, run_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        self.inner.publisher.subscribe(run_id).await
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.publisher.subscribe_all()
    }
}

impl Inner {
    fn publish(&self, event: ProgressEvent) {
        self.coordinator.progress().publish(event);
    }

    async fn set_status(&self, run_id: Uuid, status: RunStatus, message: Option<&str>) {
        if let Err(e) = self.coordinator.runs().update_status(run_id, status, message).await {
            warn!(run_id = %run_id, status = %status, error = %e, "Failed to update run status");
        }
    }

    /// Attempt loop around the coordinator. Owns the run's final status on
    /// every path except success, which the coordinator records itself.
    async fn supervise(&self, mut request: RunRequest, first_attempt: i32) {
        let run_id = request.run_id;
        let coordination = self.coordinator.coordination();
        let mut attempt = first_attempt.max(1);

        loop {
            if let Err(e) = self.coordinator.runs().set_attempt(run_id, attempt).await {
                warn!(run_id = %run_id, error = %e, "Failed to record attempt number");
            }

            let failure = match self.coordinator.execute(&request).await {
                Ok(summary) => {
                    info!(
                        run_id = %run_id,
                        attempt,
                        files = summary.processed_files,
                        records = summary.records_extracted,
                        "Run finished"
                    );
                    return;
                },
                Err(failure) => failure,
            };

            if failure.error.is_silent() {
                self.stop_quietly(run_id, &failure.error).await;
                return;
            }

            let message = failure.error.outcome_message();
            let retry = u32::try_from(attempt - first_attempt.max(1) + 1).unwrap_or(u32::MAX);
            if !self.retry.should_retry(retry, &failure.error) {
                error!(run_id = %run_id, attempt, error = %failure.error, "Run failed");
                self.set_status(run_id, RunStatus::Failed, Some(&message)).await;
                self.publish(ProgressEvent::new(run_id, ProgressStage::Failed, message));
                return;
            }

            let delay = self.retry.delay_for(retry);
            warn!(
                run_id = %run_id,
                attempt,
                retry_in_secs = delay.as_secs(),
                error = %failure.error,
                "Run attempt failed, retrying"
            );
            self.set_status(run_id, RunStatus::Pending, Some(&message)).await;
            self.publish(ProgressEvent::new(
                run_id,
                ProgressStage::Retrying,
                format!("Attempt {attempt} failed: {message}; retrying in {}s", delay.as_secs()),
            ));
            tokio::time::sleep(delay).await;

            match coordination.is_cancel_requested(run_id).await {
                Ok(true) => {
                    self.stop_quietly(run_id, &IngestError::Cancelled(run_id)).await;
                    return;
                },
                Ok(false) => {},
                Err(e) => warn!(run_id = %run_id, error = %e, "Could not check for cancellation"),
            }

            let reacquired = async {
                coordination.acquire_lock(run_id).await?;
                coordination.set_current_run(run_id).await
            }
            .await;
            if let Err(e) = reacquired {
                error!(run_id = %run_id, error = %e, "Could not restart run");
                let message = e.outcome_message();
                self.set_status(run_id, RunStatus::Failed, Some(&message)).await;
                self.publish(ProgressEvent::new(run_id, ProgressStage::Failed, message));
                if !matches!(e, IngestError::LockContention { .. }) {
                    if let Err(e) = coordination.release_lock(run_id).await {
                        warn!(run_id = %run_id, error = %e, "Failed to release lock after failed restart");
                    }
                }
                return;
            }

            if failure.checkpoint.is_some() {
                request.resume_from = failure.checkpoint;
            }
            attempt += 1;
        }
    }

    /// Cancellation or takeover: no failure event, no retry.
    async fn stop_quietly(&self, run_id: Uuid, reason: &IngestError) {
        info!(run_id = %run_id, reason = %reason, "Run stopped");
        let message = match reason {
            IngestError::Cancelled(_) => "cancelled",
            _ => "superseded by a newer run",
        };

        // Leave rows the recovery monitor already settled alone.
        match self.coordinator.runs().get_run(run_id).await {
            Ok(Some(run)) if run.status.is_active() || run.status == RunStatus::Pending => {
                self.set_status(run_id, RunStatus::Failed, Some(message)).await;
            },
            Ok(_) => {},
            Err(e) => warn!(run_id = %run_id, error = %e, "Failed to load run"),
        }
        if let Err(e) = self.coordinator.coordination().clear_cancel(run_id).await {
            warn!(run_id = %run_id, error = %e, "Failed to clear cancel request");
        }
        self.publish(ProgressEvent::new(run_id, ProgressStage::Cancelled, message));
    }
}
