//! Recovery monitor
//!
//! Periodic sweeps over the run ledger for runs whose process stopped
//! reporting:
//! - stalled: still active past the stall threshold; failed, and restarted
//!   from a surviving checkpoint when there is one
//! - interrupted: untouched past the interrupted threshold; marked
//!   `interrupted` with a recovery snapshot for a later resume
//!
//! Both sweeps key off `last_updated_at`, which runs bump after every file
//! and every pause poll.

use chrono::{DateTime, Utc};
use plantfeed_common::types::{ProgressEvent, ProgressStage, RunStatus};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::config::RecoveryConfig;
use super::coordination::Coordination;
use super::error::IngestResult;
use super::models::RecoverySnapshot;
use super::persistence::{RecordStore, RunLedger};
use super::service::IngestService;

pub const STALLED_MESSAGE: &str = "timeout auto-restart";
pub const INTERRUPTED_MESSAGE: &str = "interrupted, resumable from recovery snapshot";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub stalled: usize,
    pub restarted: usize,
    pub interrupted: usize,
    pub purged_entries: u64,
}

pub struct RecoveryMonitor {
    service: IngestService,
    config: RecoveryConfig,
}

impl RecoveryMonitor {
    pub fn new(service: IngestService, config: RecoveryConfig) -> Self {
        Self { service, config }
    }

    fn coordination(&self) -> &Coordination {
        self.service.coordination()
    }

    fn runs(&self) -> &Arc<dyn RunLedger> {
        self.service.runs()
    }

    fn records(&self) -> &Arc<dyn RecordStore> {
        self.service.records()
    }

    /// Stalled sweep, then interrupted sweep, then expired-entry purge.
    pub async fn sweep(&self) -> IngestResult<SweepReport> {
        let (stalled, restarted) = self.sweep_stalled().await?;
        let interrupted = self.sweep_interrupted().await?;
        let purged_entries = self.coordination().purge_expired().await?;

        let report = SweepReport {
            stalled,
            restarted,
            interrupted,
            purged_entries,
        };
        if report != SweepReport::default() {
            info!(?report, "Recovery sweep finished");
        }
        Ok(report)
    }

    /// Returns `(stalled, restarted)`.
    pub async fn sweep_stalled(&self) -> IngestResult<(usize, usize)> {
        let before = cutoff(self.config.stalled_after());
        let stale = self
            .runs()
            .find_stale_runs(&[RunStatus::Processing, RunStatus::Pending], before)
            .await?;

        let mut restarted = 0;
        for run in &stale {
            warn!(run_id = %run.id, last_updated_at = %run.last_updated_at, "Run stalled");
            self.runs()
                .update_status(run.id, RunStatus::Failed, Some(STALLED_MESSAGE))
                .await?;
            self.coordination().release_lock(run.id).await?;
            self.service.publish(
                ProgressEvent::new(run.id, ProgressStage::Failed, STALLED_MESSAGE)
                    .with_counts(run.processed_files, run.total_files, run.records_extracted),
            );

            let Some(checkpoint) = self.coordination().load_checkpoint(run.id).await? else {
                continue;
            };
            match self.service.restart(run, checkpoint, false).await {
                Ok(()) => restarted += 1,
                Err(e) => warn!(run_id = %run.id, error = %e, "Could not restart stalled run"),
            }
        }

        Ok((stale.len(), restarted))
    }

    pub async fn sweep_interrupted(&self) -> IngestResult<usize> {
        let before = cutoff(self.config.interrupted_after());
        let stale = self
            .runs()
            .find_stale_runs(&[RunStatus::Processing, RunStatus::Paused], before)
            .await?;

        for run in &stale {
            let checkpoint = self.coordination().load_checkpoint(run.id).await?;
            let snapshot = RecoverySnapshot {
                run_id: run.id,
                last_file: checkpoint
                    .as_ref()
                    .and_then(|c| c.last_processed_file.clone())
                    .or_else(|| run.current_file.clone()),
                processed_files: self.records().count_success_outcomes(run.id).await?,
                total_files: checkpoint
                    .as_ref()
                    .map(|c| c.total_files())
                    .unwrap_or(run.total_files),
                remaining_files: checkpoint.map(|c| c.remaining_files).unwrap_or_default(),
                recorded_at: Utc::now(),
            };

            warn!(
                run_id = %run.id,
                processed = snapshot.processed_files,
                remaining = snapshot.remaining_files.len(),
                "Run interrupted"
            );
            self.runs()
                .update_status(run.id, RunStatus::Interrupted, None)
                .await?;
            self.coordination().save_recovery_snapshot(&snapshot).await?;
            self.coordination().release_lock(run.id).await?;
            self.service.publish(
                ProgressEvent::new(run.id, ProgressStage::Interrupted, INTERRUPTED_MESSAGE)
                    .with_counts(snapshot.processed_files, snapshot.total_files, run.records_extracted),
            );
        }

        Ok(stale.len())
    }
}

/// `now - age`, saturating at the earliest representable instant.
fn cutoff(age: std::time::Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
