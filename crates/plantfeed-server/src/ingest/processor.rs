//! Per-file processing
//!
//! Downloads one file, extracts its records, writes them and records exactly
//! one file outcome. Anything that goes wrong with the file itself ends up in
//! that outcome; only a failure to record the outcome escapes.

use plantfeed_common::types::{FileOutcomeStatus, TriggerSource};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{truncate_message, IngestResult};
use super::extractor::{self, AggregateCounts};
use super::models::{BatchInsert, FileOutcome, NewFileOutcome};
use super::persistence::RecordStore;
use super::source::RemoteSession;

pub const NO_DATA_MESSAGE: &str = "no processable data found";

/// Where a file came from and which run it belongs to.
#[derive(Debug, Clone)]
pub struct FileContext {
    pub run_id: Uuid,
    pub trigger_source: TriggerSource,
    pub schedule_id: Option<i64>,
    pub file_extension: String,
}

impl FileContext {
    /// `file_type` column value: the extension without its dot, upper-cased.
    pub fn file_type(&self) -> String {
        self.file_extension.trim_start_matches('.').to_uppercase()
    }
}

/// What one file contributed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileReport {
    pub batches_created: u32,
    pub duplicates: u32,
    pub rejected: u32,
    pub aggregates: AggregateCounts,
}

impl FileReport {
    /// Newly created records of any kind.
    pub fn records_created(&self) -> u32 {
        self.batches_created + self.aggregates.total()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub outcome: FileOutcome,
    pub report: FileReport,
}

pub async fn process_file(
    session: &mut dyn RemoteSession,
    store: &dyn RecordStore,
    ctx: &FileContext,
    file_name: &str,
    location: &str,
) -> IngestResult<ProcessedFile> {
    let (status, message, report) = match extract_and_store(session, store, ctx, file_name).await {
        Ok(report) if report.records_created() > 0 => (FileOutcomeStatus::Success, None, report),
        Ok(report) => (
            FileOutcomeStatus::Skipped,
            Some(NO_DATA_MESSAGE.to_string()),
            report,
        ),
        Err(e) => {
            warn!(file = %file_name, error = %e, "File failed");
            (FileOutcomeStatus::Error, Some(e.outcome_message()), FileReport::default())
        },
    };

    let outcome = store
        .record_file_outcome(&NewFileOutcome {
            file_name: file_name.to_string(),
            file_type: ctx.file_type(),
            remote_path: location.to_string(),
            status,
            error_message: message.as_deref().map(truncate_message),
            trigger_source: ctx.trigger_source,
            schedule_id: ctx.schedule_id,
            run_id: Some(ctx.run_id),
        })
        .await?;

    info!(
        file = %file_name,
        status = %status,
        batches = report.batches_created,
        duplicates = report.duplicates,
        rejected = report.rejected,
        aggregates = report.aggregates.total(),
        "File processed"
    );

    Ok(ProcessedFile { outcome, report })
}

async fn extract_and_store(
    session: &mut dyn RemoteSession,
    store: &dyn RecordStore,
    ctx: &FileContext,
    file_name: &str,
) -> IngestResult<FileReport> {
    let bytes = session.download(file_name).await?;
    let document = extractor::validate(&bytes)?;
    // Before any write, so an undated file leaves nothing behind.
    let date = extractor::derive_report_date(file_name, &ctx.file_extension)?;

    let mut report = FileReport::default();

    for extracted in extractor::extract_batch_events(&document.root, file_name) {
        let event = match extracted {
            Ok(event) => event,
            Err(e) => {
                warn!(file = %file_name, error = %e, "Rejected batch");
                report.rejected += 1;
                continue;
            },
        };
        match store.create_batch_event(&event).await {
            Ok(BatchInsert::Inserted) => report.batches_created += 1,
            Ok(BatchInsert::Duplicate) => {
                debug!(file = %file_name, key = %event.key(), "Duplicate batch skipped");
                report.duplicates += 1;
            },
            Err(e) => {
                warn!(file = %file_name, key = %event.key(), error = %e, "Batch write failed");
                report.rejected += 1;
            },
        }
    }

    for record in extractor::extract_aggregates(&document.root, date) {
        match store.upsert_aggregate(&record).await {
            Ok(created) => report.aggregates.add(record.kind(), u32::from(created)),
            Err(e) => {
                warn!(file = %file_name, kind = %record.kind(), error = %e, "Aggregate write failed");
            },
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::testing::{MemoryRemote, MemoryStore};
    use crate::ingest::models::AggregateKind;

    fn ctx() -> FileContext {
        FileContext {
            run_id: Uuid::new_v4(),
            trigger_source: TriggerSource::Manual,
            schedule_id: None,
            file_extension: ".xml".into(),
        }
    }

    async fn run(remote: &MemoryRemote, store: &MemoryStore, name: &str) -> ProcessedFile {
        let mut session = remote.session();
        process_file(&mut session, store, &ctx(), name, &format!("ftp://plant/{name}"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_three_batches_make_a_success() {
        let remote = MemoryRemote::new().with_file("REPORT_310723.xml", &MemoryRemote::batch_report(&[1, 2, 3]));
        let store = MemoryStore::new();

        let processed = run(&remote, &store, "REPORT_310723.xml").await;
        assert_eq!(processed.outcome.status, FileOutcomeStatus::Success);
        assert_eq!(processed.report.batches_created, 3);
        assert_eq!(store.batch_count(), 3);
        assert_eq!(store.outcomes().len(), 1);
        assert_eq!(processed.outcome.file_type, "XML");
    }

    #[tokio::test]
    async fn test_duplicates_only_is_skipped() {
        let body = MemoryRemote::batch_report(&[7]);
        let remote = MemoryRemote::new()
            .with_file("A_010124.xml", &body)
            .with_file("B_020124.xml", &body);
        let store = MemoryStore::new();

        assert_eq!(run(&remote, &store, "A_010124.xml").await.outcome.status, FileOutcomeStatus::Success);
        let second = run(&remote, &store, "B_020124.xml").await;
        assert_eq!(second.outcome.status, FileOutcomeStatus::Skipped);
        assert_eq!(second.outcome.error_message.as_deref(), Some(NO_DATA_MESSAGE));
        assert_eq!(second.report.duplicates, 1);
        assert_eq!(store.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_root_is_an_error_outcome() {
        let remote = MemoryRemote::new().with_file("X_310723.xml", "<Unknown/>");
        let store = MemoryStore::new();

        let processed = run(&remote, &store, "X_310723.xml").await;
        assert_eq!(processed.outcome.status, FileOutcomeStatus::Error);
        assert!(processed.outcome.error_message.unwrap().contains("root tag"));
    }

    #[tokio::test]
    async fn test_empty_tables_are_skipped() {
        let body = "<DailyXMLReport><PlantRunTime/><RecipeTotals/><MaterialTotals/></DailyXMLReport>";
        let remote = MemoryRemote::new().with_file("D_310723.xml", body);
        let store = MemoryStore::new();

        let processed = run(&remote, &store, "D_310723.xml").await;
        assert_eq!(processed.outcome.status, FileOutcomeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_oversized_run_time_is_stored_as_zero() {
        let body = r#"<DailyXMLReport><Report><PlantRunTime>
            <RunTime><ItemName>Mixer</ItemName><RunningTime>9223372036854775807:00:00</RunningTime></RunTime>
        </PlantRunTime></Report></DailyXMLReport>"#;
        let remote = MemoryRemote::new().with_file("T_310723.xml", body);
        let store = MemoryStore::new();

        let processed = run(&remote, &store, "T_310723.xml").await;
        assert_eq!(processed.outcome.status, FileOutcomeStatus::Success);
        assert_eq!(processed.report.aggregates.run_time, 1);
    }

    #[tokio::test]
    async fn test_undated_name_writes_nothing() {
        let remote = MemoryRemote::new().with_file("nodate.xml", &MemoryRemote::batch_report(&[1]));
        let store = MemoryStore::new();

        let processed = run(&remote, &store, "nodate.xml").await;
        assert_eq!(processed.outcome.status, FileOutcomeStatus::Error);
        assert!(processed.outcome.error_message.unwrap().contains("derive date"));
        assert_eq!(store.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_download_is_an_error_outcome() {
        let remote = MemoryRemote::new();
        let store = MemoryStore::new();

        let processed = run(&remote, &store, "GONE_310723.xml").await;
        assert_eq!(processed.outcome.status, FileOutcomeStatus::Error);
        assert!(processed.outcome.error_message.unwrap().contains("GONE_310723.xml"));
    }

    #[tokio::test]
    async fn test_rejected_batches_do_not_hide_good_ones() {
        let body = r#"<BatchLogs>
            <BatchLog><BatchNo>1</BatchNo><Time>2023-07-31T06:00:00</Time><JobNo>9</JobNo></BatchLog>
            <BatchLog><BatchNo>2</BatchNo><JobNo>9</JobNo></BatchLog>
        </BatchLogs>"#;
        let remote = MemoryRemote::new().with_file("R_310723.xml", body);
        let store = MemoryStore::new();

        let processed = run(&remote, &store, "R_310723.xml").await;
        assert_eq!(processed.outcome.status, FileOutcomeStatus::Success);
        assert_eq!(processed.report.batches_created, 1);
        assert_eq!(processed.report.rejected, 1);
    }

    #[tokio::test]
    async fn test_aggregate_upserts_count_only_new_rows() {
        let body = r#"<DailyXMLReport>
            <RecipeTotals><RecipeTotal><RecipeNo>4</RecipeNo><Total>10</Total></RecipeTotal></RecipeTotals>
        </DailyXMLReport>"#;
        let remote = MemoryRemote::new()
            .with_file("D_310723.xml", body)
            .with_file("E_310723.xml", body);
        let store = MemoryStore::new();

        let first = run(&remote, &store, "D_310723.xml").await;
        assert_eq!(first.report.aggregates.recipes, 1);
        let second = run(&remote, &store, "E_310723.xml").await;
        assert_eq!(second.report.aggregates.recipes, 0);
        assert_eq!(second.outcome.status, FileOutcomeStatus::Skipped);
        assert_eq!(store.aggregate_count(AggregateKind::Recipe), 1);
    }
}
