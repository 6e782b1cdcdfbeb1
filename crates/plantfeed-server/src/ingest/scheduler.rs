//! Background scheduler
//!
//! Runs the recovery sweeps on their interval and, when a schedule id is
//! configured, starts scheduled runs on the configured cadence.

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use super::config::IngestConfig;
use super::error::IngestError;
use super::recovery::RecoveryMonitor;
use super::service::IngestService;

pub struct IngestScheduler {
    service: IngestService,
    config: IngestConfig,
}

impl IngestScheduler {
    pub fn new(service: IngestService, config: IngestConfig) -> Self {
        Self { service, config }
    }

    /// Spawn the scheduler loops. Abort the returned handles to stop them.
    pub fn start(self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let monitor = RecoveryMonitor::new(self.service.clone(), self.config.recovery.clone());
        let sweep_every = self.config.recovery.interval();
        info!(interval_secs = sweep_every.as_secs(), "Starting recovery monitor");
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(sweep_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = monitor.sweep().await {
                    error!(error = %e, "Recovery sweep failed");
                }
            }
        }));

        match self.config.schedule.schedule_id {
            Some(schedule_id) => {
                let service = self.service.clone();
                let every = self.config.schedule.interval();
                info!(schedule_id, interval_secs = every.as_secs(), "Starting scheduled ingestion");
                handles.push(tokio::spawn(async move {
                    let mut ticker = interval(every);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        ticker.tick().await;
                        trigger_scheduled(&service, schedule_id).await;
                    }
                }));
            },
            None => info!("No ingestion schedule configured, scheduled runs disabled"),
        }

        handles
    }
}

async fn trigger_scheduled(service: &IngestService, schedule_id: i64) {
    match service.start_scheduled_run(schedule_id).await {
        Ok(run_id) => info!(run_id = %run_id, schedule_id, "Scheduled run started"),
        Err(IngestError::LockContention { holder }) => {
            info!(schedule_id, holder = %holder, "Skipping scheduled run, another run is active")
        },
        Err(e) => warn!(schedule_id, error = %e, "Scheduled run could not start"),
    }
}
