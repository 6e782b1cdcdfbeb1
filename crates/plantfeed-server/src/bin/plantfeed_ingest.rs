//! Plantfeed one-shot ingestion CLI
//!
//! Runs a single ingestion or recovery sweep against the configured database
//! and FTP drop without starting the HTTP server.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plantfeed_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use plantfeed_common::types::{FileOutcomeStatus, RunStatus};
use std::process;
use tokio::sync::broadcast::error::RecvError;
use tracing::error;

use plantfeed_server::config::DatabaseConfig;
use plantfeed_server::ingest::models::OutcomeFilter;
use plantfeed_server::ingest::{IngestConfig, IngestService, RecoveryMonitor};

#[derive(Parser, Debug)]
#[command(name = "plantfeed-ingest", version, about = "One-shot plant report ingestion")]
struct Cli {
    /// Log debug output to the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a run and keep the process alive until it ends
    Run {
        /// Run against this schedule's remote path instead of REMOTE_DIR
        #[arg(long)]
        schedule_id: Option<i64>,

        /// Print progress events as JSON lines while the run is going
        #[arg(long)]
        wait: bool,
    },

    /// Run the stalled and interrupted sweeps once
    Sweep,

    /// Print recent file outcomes as JSON
    Outcomes {
        /// success, skipped or error
        #[arg(long)]
        status: Option<FileOutcomeStatus>,

        #[arg(long, default_value_t = OutcomeFilter::DEFAULT_LIMIT)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("plantfeed-ingest")
        .build();
    let log_config = log_config.overlay_env().unwrap_or_default();
    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        },
    };

    if let Err(e) = execute(cli.command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute(command: Command) -> Result<()> {
    let ingest_config = IngestConfig::from_env()?;
    let pool = DatabaseConfig::from_env().connect().await?;
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    let service = IngestService::postgres(pool, &ingest_config);

    match command {
        Command::Run { schedule_id, wait } => run(&service, schedule_id, wait).await,
        Command::Sweep => {
            let monitor = RecoveryMonitor::new(service, ingest_config.recovery);
            let report = monitor.sweep().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        },
        Command::Outcomes { status, limit } => {
            let filter = OutcomeFilter {
                status,
                limit: Some(limit),
                ..Default::default()
            };
            let outcomes = service.list_outcomes(&filter).await?;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
            Ok(())
        },
    }
}

async fn run(service: &IngestService, schedule_id: Option<i64>, stream_progress: bool) -> Result<()> {
    // Subscribe before starting so the first events are not missed.
    let mut events = service.subscribe_all();

    let run_id = match schedule_id {
        Some(id) => service.start_scheduled_run(id).await?,
        None => service.start_manual_run().await?,
    };
    eprintln!("Started run {run_id}");

    if stream_progress {
        loop {
            match events.recv().await {
                Ok(event) if event.run_id == run_id => {
                    println!("{}", serde_json::to_string(&event)?);
                    if event.stage.is_final() {
                        break;
                    }
                },
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    }

    service.wait(run_id).await;
    let run = service.get_run(run_id).await?;
    println!("{}", serde_json::to_string_pretty(&run)?);
    if run.status == RunStatus::Failed {
        anyhow::bail!(
            "run {run_id} failed: {}",
            run.error_message.unwrap_or_default()
        );
    }
    Ok(())
}
