//! PostgreSQL record store and run ledger tests
//!
//! Checks that:
//! 1. Batch events are unique by (batch_no, event_time, job_no), even when
//!    two inserts of the same key race
//! 2. Aggregate upserts report creation only for new natural keys
//! 3. Settled-file lookups only count success and skipped outcomes
//! 4. The run ledger finds stale runs by status and age

mod common;

use anyhow::Result;
use bigdecimal::BigDecimal;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use plantfeed_common::types::{FileOutcomeStatus, RunStatus, TriggerSource};
use plantfeed_server::ingest::models::{
    AggregateRecord, BatchEvent, BatchInsert, Equipment, NewFileOutcome, NewRun, OutcomeFilter,
    RecipeTotal, RunProgress, RunTimeTable, SetPoint,
};
use plantfeed_server::ingest::persistence::{PgStore, RecordStore, RunLedger};
use serial_test::serial;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use common::TestPostgres;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 7, 31).unwrap()
}

fn batch(batch_no: i64, source_file: &str) -> BatchEvent {
    BatchEvent {
        batch_no,
        event_time: day().and_hms_opt(6, 30, 0).unwrap(),
        job_no: 12,
        recipe_no: Some(3),
        recipe_name: Some("AC14 SURF".into()),
        bitumen: SetPoint {
            actual: Some(BigDecimal::from_str("52.40").unwrap()),
            target: Some(BigDecimal::from_str("53.00").unwrap()),
        },
        filler: SetPoint::default(),
        reclaim: SetPoint::default(),
        temperature: SetPoint::default(),
        hot_bins: vec![SetPoint {
            actual: Some(BigDecimal::from(410)),
            target: Some(BigDecimal::from(400)),
        }],
        source_file: source_file.to_string(),
    }
}

fn outcome(name: &str, status: FileOutcomeStatus, run_id: Option<Uuid>) -> NewFileOutcome {
    NewFileOutcome {
        file_name: name.to_string(),
        file_type: "XML".into(),
        remote_path: format!("ftp://plant01/reports/{name}"),
        status,
        error_message: None,
        trigger_source: TriggerSource::Manual,
        schedule_id: None,
        run_id,
    }
}

async fn new_run(store: &PgStore) -> Result<Uuid> {
    let id = Uuid::new_v4();
    store
        .create_run(&NewRun {
            id,
            trigger_source: TriggerSource::Manual,
            schedule_id: None,
            remote_path: "/reports".into(),
        })
        .await?;
    Ok(id)
}

#[tokio::test]
#[serial]
async fn test_batch_events_are_deduplicated_by_natural_key() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let store = PgStore::new(pg.pool().clone());

    assert_eq!(store.create_batch_event(&batch(1, "A_310723.xml")).await?, BatchInsert::Inserted);
    assert_eq!(store.create_batch_event(&batch(1, "B_310723.xml")).await?, BatchInsert::Duplicate);
    assert_eq!(store.create_batch_event(&batch(2, "B_310723.xml")).await?, BatchInsert::Inserted);

    let (count, source, bin_1): (i64, String, Option<BigDecimal>) = sqlx::query_as(
        "SELECT COUNT(*) OVER (), source_file, hot_bin_1_actual FROM batch_events WHERE batch_no = 1",
    )
    .fetch_one(pg.pool())
    .await?;
    assert_eq!(count, 1);
    assert_eq!(source, "A_310723.xml");
    assert_eq!(bin_1, Some(BigDecimal::from(410)));

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_racing_inserts_of_one_batch_store_it_once() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let store = PgStore::new(pg.pool().clone());

    for batch_no in 100..105 {
        let first = batch(batch_no, "A_310723.xml");
        let second = batch(batch_no, "B_310723.xml");
        let (a, b) = tokio::join!(store.create_batch_event(&first), store.create_batch_event(&second));

        let mut results = vec![a?, b?];
        results.sort_by_key(|r| *r == BatchInsert::Duplicate);
        assert_eq!(results, vec![BatchInsert::Inserted, BatchInsert::Duplicate], "batch {batch_no}");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batch_events WHERE batch_no = $1")
            .bind(batch_no)
            .fetch_one(pg.pool())
            .await?;
        assert_eq!(count, 1, "batch {batch_no}");
    }

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_aggregate_upserts_update_in_place() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let store = PgStore::new(pg.pool().clone());

    let recipe = |total: f64| {
        AggregateRecord::Recipe(RecipeTotal {
            date: day(),
            recipe_no: 4,
            recipe_name: Some("Base".into()),
            total: Some(total),
        })
    };
    assert!(store.upsert_aggregate(&recipe(10.0)).await?);
    assert!(!store.upsert_aggregate(&recipe(25.5)).await?);

    let total: Option<f64> =
        sqlx::query_scalar("SELECT total FROM daily_recipes WHERE date = $1 AND recipe_no = 4")
            .bind(day())
            .fetch_one(pg.pool())
            .await?;
    assert_eq!(total, Some(25.5));

    let mut seconds = BTreeMap::new();
    seconds.insert(Equipment::Dryer, 3600);
    seconds.insert(Equipment::HotElevator, 1800);
    let run_time = AggregateRecord::RunTime(RunTimeTable { date: day(), seconds });
    assert!(store.upsert_aggregate(&run_time).await?);

    let (dryer, mixer): (Option<i64>, Option<i64>) =
        sqlx::query_as("SELECT dryer_secs, mixer_secs FROM plant_run_time WHERE date = $1")
            .bind(day())
            .fetch_one(pg.pool())
            .await?;
    assert_eq!(dryer, Some(3600));
    assert_eq!(mixer, None);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_outcomes_settle_files_and_filter() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let store = PgStore::new(pg.pool().clone());
    let run_id = new_run(&store).await?;

    store.record_file_outcome(&outcome("A_010124.xml", FileOutcomeStatus::Success, Some(run_id))).await?;
    store.record_file_outcome(&outcome("B_020124.xml", FileOutcomeStatus::Skipped, Some(run_id))).await?;
    store.record_file_outcome(&outcome("C_030124.xml", FileOutcomeStatus::Error, Some(run_id))).await?;
    store.record_file_outcome(&outcome("D_040124.xml", FileOutcomeStatus::Success, None)).await?;

    let names: Vec<String> = ["A_010124.xml", "B_020124.xml", "C_030124.xml", "E_050124.xml"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let settled = store.settled_file_names(&names).await?;
    assert_eq!(settled.len(), 2);
    assert!(settled.contains("A_010124.xml"));
    assert!(settled.contains("B_020124.xml"));

    let errors = store
        .list_file_outcomes(&OutcomeFilter {
            status: Some(FileOutcomeStatus::Error),
            ..Default::default()
        })
        .await?;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].file_name, "C_030124.xml");

    let of_run = store
        .list_file_outcomes(&OutcomeFilter {
            run_id: Some(run_id),
            limit: Some(2),
            ..Default::default()
        })
        .await?;
    assert_eq!(of_run.len(), 2);
    assert!(of_run[0].id > of_run[1].id, "newest first");

    assert_eq!(store.count_success_outcomes(run_id).await?, 1);

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_run_ledger_tracks_progress_and_staleness() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let store = PgStore::new(pg.pool().clone());
    let run_id = new_run(&store).await?;

    let run = store.get_run(run_id).await?.unwrap();
    assert_eq!(run.status, RunStatus::Pending);
    assert_eq!(run.attempt, 0);

    store.update_status(run_id, RunStatus::Processing, None).await?;
    store
        .update_progress(
            run_id,
            &RunProgress {
                total_files: 4,
                processed_files: 1,
                current_file: Some("B_020124.xml".into()),
                records_extracted: 9,
            },
        )
        .await?;
    store.set_attempt(run_id, 2).await?;

    let run = store.get_run(run_id).await?.unwrap();
    assert_eq!(run.processed_files, 1);
    assert_eq!(run.current_file.as_deref(), Some("B_020124.xml"));
    assert_eq!(run.attempt, 2);

    let later = Utc::now() + ChronoDuration::minutes(1);
    let stale = store.find_stale_runs(&[RunStatus::Processing], later).await?;
    assert_eq!(stale.len(), 1);
    assert!(store.find_stale_runs(&[RunStatus::Paused], later).await?.is_empty());
    let earlier = Utc::now() - ChronoDuration::minutes(1);
    assert!(store.find_stale_runs(&[RunStatus::Processing], earlier).await?.is_empty());

    store.update_status(run_id, RunStatus::Interrupted, None).await?;
    assert_eq!(store.latest_interrupted_run().await?.map(|r| r.id), Some(run_id));
    assert_eq!(store.latest_run().await?.map(|r| r.id), Some(run_id));

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_only_active_schedules_are_returned() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let store = PgStore::new(pg.pool().clone());

    let active: i64 = sqlx::query_scalar(
        "INSERT INTO parsing_schedules (name, remote_path, cadence) VALUES ('night', '/night', 'daily') RETURNING id",
    )
    .fetch_one(pg.pool())
    .await?;
    let inactive: i64 = sqlx::query_scalar(
        "INSERT INTO parsing_schedules (name, remote_path, cadence, is_active) \
         VALUES ('old', '/old', 'hourly', FALSE) RETURNING id",
    )
    .fetch_one(pg.pool())
    .await?;

    let schedule = store.get_schedule(active).await?.unwrap();
    assert_eq!(schedule.remote_path, "/night");
    assert!(store.get_schedule(inactive).await?.is_none());

    Ok(())
}
