//! End-to-end ingestion against PostgreSQL
//!
//! A static in-process remote feeds report files through the full service:
//! coordinator, extractor, PgStore and the PostgreSQL coordination store.

mod common;

use anyhow::Result;
use async_trait::async_trait;
use plantfeed_common::types::{FileOutcomeStatus, RunStatus};
use plantfeed_server::ingest::config::RunConfig;
use plantfeed_server::ingest::coordination::{Coordination, PgCoordinationStore};
use plantfeed_server::ingest::coordinator::RunCoordinator;
use plantfeed_server::ingest::models::OutcomeFilter;
use plantfeed_server::ingest::persistence::PgStore;
use plantfeed_server::ingest::progress::{ProgressPublisher, DEFAULT_TOPIC_CAPACITY};
use plantfeed_server::ingest::retry::RetryPolicy;
use plantfeed_server::ingest::source::{RemoteFile, RemoteSession, RemoteSource};
use plantfeed_server::ingest::{IngestError, IngestResult, IngestService};
use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;

use common::TestPostgres;

const BATCHES: &str = "<BatchLogs>\
    <BatchLog><BatchNo>1</BatchNo><Time>2024-01-01T06:00:00</Time><JobNo>7</JobNo>\
      <RecipeNo>3</RecipeNo><Bitumen><Actual>52.5</Actual><Target>53</Target></Bitumen></BatchLog>\
    <BatchLog><BatchNo>2</BatchNo><Time>2024-01-01T06:02:00</Time><JobNo>7</JobNo>\
      <RecipeNo>3</RecipeNo></BatchLog>\
  </BatchLogs>";

/// Serves a fixed list of files.
#[derive(Clone)]
struct StaticRemote {
    files: Arc<Vec<(String, String)>>,
}

impl StaticRemote {
    fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: Arc::new(
                files
                    .iter()
                    .map(|(name, body)| (name.to_string(), body.to_string()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl RemoteSource for StaticRemote {
    async fn connect(&self, _remote_path: &str) -> IngestResult<Box<dyn RemoteSession>> {
        Ok(Box::new(self.clone()))
    }

    fn file_location(&self, remote_path: &str, file_name: &str) -> String {
        format!("static://{}/{}", remote_path.trim_matches('/'), file_name)
    }
}

#[async_trait]
impl RemoteSession for StaticRemote {
    async fn list(&mut self) -> IngestResult<Vec<RemoteFile>> {
        Ok(self.files.iter().map(|(name, _)| RemoteFile::named(name.as_str())).collect())
    }

    async fn download(&mut self, file_name: &str) -> IngestResult<Vec<u8>> {
        self.files
            .iter()
            .find(|(name, _)| name == file_name)
            .map(|(_, body)| body.as_bytes().to_vec())
            .ok_or_else(|| IngestError::DownloadFailed {
                file: file_name.to_string(),
                reason: "missing".to_string(),
            })
    }

    async fn close(self: Box<Self>) {}
}

fn service(pool: &PgPool, remote: StaticRemote) -> IngestService {
    let store = Arc::new(PgStore::new(pool.clone()));
    let config = RunConfig::default();
    let coordination = Coordination::new(Arc::new(PgCoordinationStore::new(pool.clone())), &config);
    let (publisher, sender) = ProgressPublisher::start(DEFAULT_TOPIC_CAPACITY);
    let coordinator = RunCoordinator::new(
        Arc::new(remote),
        store.clone(),
        store,
        coordination,
        sender,
        config,
    );
    IngestService::new(coordinator, publisher, RetryPolicy::none(), "/reports")
}

async fn count(pool: &PgPool, table: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?)
}

#[tokio::test]
#[serial]
async fn test_manual_run_persists_batches_and_outcomes() -> Result<()> {
    common::init_tracing();
    let pg = TestPostgres::start().await?;
    let remote = StaticRemote::new(&[
        ("BATCH_010124.xml", BATCHES),
        ("broken_020124.xml", "<Unknown/>"),
        ("readme.txt", "not a report"),
    ]);
    let service = service(pg.pool(), remote);

    let run_id = service.start_manual_run().await?;
    service.wait(run_id).await;

    let run = service.get_run(run_id).await?;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_files, 2);
    assert_eq!(run.processed_files, 2);
    assert_eq!(run.records_extracted, 2);

    assert_eq!(count(pg.pool(), "batch_events").await?, 2);
    let errors = service
        .list_outcomes(&OutcomeFilter {
            status: Some(FileOutcomeStatus::Error),
            ..Default::default()
        })
        .await?;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].file_name, "broken_020124.xml");
    assert_eq!(errors[0].remote_path, "static://reports/broken_020124.xml");

    assert_eq!(service.status().await?.active_run_id, None);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_second_run_skips_settled_files() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let service = service(pg.pool(), StaticRemote::new(&[("BATCH_010124.xml", BATCHES)]));

    let first = service.start_manual_run().await?;
    service.wait(first).await;
    let second = service.start_manual_run().await?;
    service.wait(second).await;

    let run = service.get_run(second).await?;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_files, 0);
    assert_eq!(count(pg.pool(), "batch_events").await?, 2);

    let outcomes = service.list_outcomes(&OutcomeFilter::default()).await?;
    assert_eq!(outcomes.len(), 1);

    Ok(())
}
