//! PostgreSQL implementation of the persistence seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use plantfeed_common::types::{FileOutcomeStatus, RunStatus};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use super::{RecordStore, RunLedger};
use crate::ingest::error::IngestResult;
use crate::ingest::models::{
    AggregateRecord, BatchEvent, BatchInsert, FileOutcome, IngestionRun, MaterialTotal,
    NewFileOutcome, NewRun, OeeSummary, OutcomeFilter, RecipeTotal, RunProgress, RunTimeTable,
    ScheduleDefinition, SetPoint, MAX_HOT_BINS,
};

const RUN_COLUMNS: &str = "id, status, trigger_source, schedule_id, remote_path, total_files, \
     processed_files, current_file, records_extracted, attempt, error_message, created_at, \
     last_updated_at";

const OUTCOME_COLUMNS: &str = "id, file_name, file_type, remote_path, recorded_at, status, \
     error_message, trigger_source, schedule_id, run_id";

const PROCESS_VARIABLES: [&str; 4] = ["bitumen", "filler", "reclaim", "temperature"];

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn upsert_oee(&self, oee: &OeeSummary) -> IngestResult<bool> {
        let created = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO oee_daily_data (
                date, total_production, total_empty_out, production_batches, empty_out_batches
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (date) DO UPDATE SET
                total_production = EXCLUDED.total_production,
                total_empty_out = EXCLUDED.total_empty_out,
                production_batches = EXCLUDED.production_batches,
                empty_out_batches = EXCLUDED.empty_out_batches,
                updated_at = NOW()
            RETURNING (xmax = 0) AS created
            "#,
        )
        .bind(oee.date)
        .bind(oee.total_production)
        .bind(oee.total_empty_out)
        .bind(oee.production_batches)
        .bind(oee.empty_out_batches)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn upsert_run_time(&self, table: &RunTimeTable) -> IngestResult<bool> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO plant_run_time (date");
        for equipment in table.seconds.keys() {
            qb.push(", ").push(equipment.column());
        }
        qb.push(") VALUES (");
        {
            let mut values = qb.separated(", ");
            values.push_bind(table.date);
            for secs in table.seconds.values() {
                values.push_bind(*secs);
            }
        }
        qb.push(") ON CONFLICT (date) DO UPDATE SET ");
        for equipment in table.seconds.keys() {
            let column = equipment.column();
            qb.push(format!("{column} = EXCLUDED.{column}, "));
        }
        qb.push("updated_at = NOW() RETURNING (xmax = 0) AS created");

        let created = qb.build_query_scalar::<bool>().fetch_one(&self.pool).await?;
        Ok(created)
    }

    async fn upsert_recipe(&self, recipe: &RecipeTotal) -> IngestResult<bool> {
        let created = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO daily_recipes (date, recipe_no, recipe_name, total)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (date, recipe_no) DO UPDATE SET
                recipe_name = EXCLUDED.recipe_name,
                total = EXCLUDED.total,
                updated_at = NOW()
            RETURNING (xmax = 0) AS created
            "#,
        )
        .bind(recipe.date)
        .bind(recipe.recipe_no)
        .bind(&recipe.recipe_name)
        .bind(recipe.total)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn upsert_material(&self, material: &MaterialTotal) -> IngestResult<bool> {
        let created = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO daily_materials (date, material_no, name, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (date, material_no) DO UPDATE SET
                name = EXCLUDED.name,
                quantity = EXCLUDED.quantity,
                updated_at = NOW()
            RETURNING (xmax = 0) AS created
            "#,
        )
        .bind(material.date)
        .bind(material.material_no)
        .bind(&material.name)
        .bind(material.quantity)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }
}

/// Column order used by [`push_batch_values`].
fn batch_columns() -> Vec<String> {
    let mut columns: Vec<String> = ["batch_no", "event_time", "job_no", "recipe_no", "recipe_name"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    for variable in PROCESS_VARIABLES {
        columns.push(format!("{variable}_actual"));
        columns.push(format!("{variable}_target"));
    }
    for bin in 1..=MAX_HOT_BINS {
        columns.push(format!("hot_bin_{bin}_actual"));
        columns.push(format!("hot_bin_{bin}_target"));
    }
    columns.push("source_file".to_string());
    columns
}

fn push_batch_values(qb: &mut QueryBuilder<'_, Postgres>, event: &BatchEvent) {
    let mut values = qb.separated(", ");
    values.push_bind(event.batch_no);
    values.push_bind(event.event_time);
    values.push_bind(event.job_no);
    values.push_bind(event.recipe_no);
    values.push_bind(event.recipe_name.clone());

    let variables: [&SetPoint; 4] = [&event.bitumen, &event.filler, &event.reclaim, &event.temperature];
    for point in variables {
        values.push_bind(point.actual.clone());
        values.push_bind(point.target.clone());
    }
    for bin in 1..=MAX_HOT_BINS {
        let point = event.hot_bin(bin);
        values.push_bind(point.actual);
        values.push_bind(point.target);
    }
    values.push_bind(event.source_file.clone());
}

#[async_trait]
impl RecordStore for PgStore {
    async fn create_batch_event(&self, event: &BatchEvent) -> IngestResult<BatchInsert> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM batch_events
                WHERE batch_no = $1 AND event_time = $2 AND job_no = $3
            )
            "#,
        )
        .bind(event.batch_no)
        .bind(event.event_time)
        .bind(event.job_no)
        .fetch_one(&mut *tx)
        .await?;

        if exists {
            tx.rollback().await?;
            return Ok(BatchInsert::Duplicate);
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO batch_events (");
        qb.push(batch_columns().join(", "));
        qb.push(") VALUES (");
        push_batch_values(&mut qb, event);
        qb.push(") ON CONFLICT (batch_no, event_time, job_no) DO NOTHING RETURNING id");

        // A racing insert of the same key lands on the conflict clause.
        let inserted = qb.build_query_scalar::<i64>().fetch_optional(&mut *tx).await?;
        tx.commit().await?;

        Ok(match inserted {
            Some(_) => BatchInsert::Inserted,
            None => BatchInsert::Duplicate,
        })
    }

    async fn upsert_aggregate(&self, record: &AggregateRecord) -> IngestResult<bool> {
        match record {
            AggregateRecord::Oee(oee) => self.upsert_oee(oee).await,
            AggregateRecord::RunTime(table) => self.upsert_run_time(table).await,
            AggregateRecord::Recipe(recipe) => self.upsert_recipe(recipe).await,
            AggregateRecord::Material(material) => self.upsert_material(material).await,
        }
    }

    async fn record_file_outcome(&self, outcome: &NewFileOutcome) -> IngestResult<FileOutcome> {
        let sql = format!(
            r#"
            INSERT INTO file_outcomes (
                file_name, file_type, remote_path, status, error_message,
                trigger_source, schedule_id, run_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {OUTCOME_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, FileOutcome>(&sql)
            .bind(&outcome.file_name)
            .bind(&outcome.file_type)
            .bind(&outcome.remote_path)
            .bind(outcome.status.as_str())
            .bind(&outcome.error_message)
            .bind(outcome.trigger_source.as_str())
            .bind(outcome.schedule_id)
            .bind(outcome.run_id)
            .fetch_one(&self.pool)
            .await?;

        debug!(file = %row.file_name, status = %row.status, "Recorded file outcome");
        Ok(row)
    }

    async fn settled_file_names(&self, names: &[String]) -> IngestResult<HashSet<String>> {
        if names.is_empty() {
            return Ok(HashSet::new());
        }

        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT file_name FROM file_outcomes
            WHERE file_name = ANY($1) AND status IN ($2, $3)
            "#,
        )
        .bind(names)
        .bind(FileOutcomeStatus::Success.as_str())
        .bind(FileOutcomeStatus::Skipped.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn list_file_outcomes(&self, filter: &OutcomeFilter) -> IngestResult<Vec<FileOutcome>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {OUTCOME_COLUMNS} FROM file_outcomes WHERE TRUE"));

        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(trigger) = filter.trigger_source {
            qb.push(" AND trigger_source = ").push_bind(trigger.as_str());
        }
        if let Some(from) = filter.from {
            qb.push(" AND recorded_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND recorded_at <= ").push_bind(to);
        }
        if let Some(run_id) = filter.run_id {
            qb.push(" AND run_id = ").push_bind(run_id);
        }

        qb.push(" ORDER BY recorded_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit())
            .push(" OFFSET ")
            .push_bind(filter.offset());

        let rows = qb.build_query_as::<FileOutcome>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn count_success_outcomes(&self, run_id: Uuid) -> IngestResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM file_outcomes WHERE run_id = $1 AND status = $2",
        )
        .bind(run_id)
        .bind(FileOutcomeStatus::Success.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[async_trait]
impl RunLedger for PgStore {
    async fn create_run(&self, run: &NewRun) -> IngestResult<IngestionRun> {
        let sql = format!(
            r#"
            INSERT INTO ingestion_runs (id, status, trigger_source, schedule_id, remote_path)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {RUN_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, IngestionRun>(&sql)
            .bind(run.id)
            .bind(RunStatus::Pending.as_str())
            .bind(run.trigger_source.as_str())
            .bind(run.schedule_id)
            .bind(&run.remote_path)
            .fetch_one(&self.pool)
            .await?;

        Ok(row)
    }

    async fn get_run(&self, run_id: Uuid) -> IngestResult<Option<IngestionRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM ingestion_runs WHERE id = $1");
        let row = sqlx::query_as::<_, IngestionRun>(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn latest_run(&self) -> IngestResult<Option<IngestionRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM ingestion_runs ORDER BY created_at DESC LIMIT 1");
        let row = sqlx::query_as::<_, IngestionRun>(&sql)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn latest_interrupted_run(&self) -> IngestResult<Option<IngestionRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM ingestion_runs WHERE status = $1 \
             ORDER BY last_updated_at DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, IngestionRun>(&sql)
            .bind(RunStatus::Interrupted.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> IngestResult<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_runs
            SET status = $2, error_message = $3, last_updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_progress(&self, run_id: Uuid, progress: &RunProgress) -> IngestResult<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_runs
            SET total_files = $2, processed_files = $3, current_file = $4,
                records_extracted = $5, last_updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(progress.total_files)
        .bind(progress.processed_files)
        .bind(&progress.current_file)
        .bind(progress.records_extracted)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_attempt(&self, run_id: Uuid, attempt: i32) -> IngestResult<()> {
        sqlx::query("UPDATE ingestion_runs SET attempt = $2, last_updated_at = NOW() WHERE id = $1")
            .bind(run_id)
            .bind(attempt)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch(&self, run_id: Uuid) -> IngestResult<()> {
        sqlx::query("UPDATE ingestion_runs SET last_updated_at = NOW() WHERE id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_stale_runs(
        &self,
        statuses: &[RunStatus],
        before: DateTime<Utc>,
    ) -> IngestResult<Vec<IngestionRun>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM ingestion_runs \
             WHERE status = ANY($1) AND last_updated_at < $2 ORDER BY last_updated_at"
        );
        let rows = sqlx::query_as::<_, IngestionRun>(&sql)
            .bind(statuses)
            .bind(before)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn get_schedule(&self, schedule_id: i64) -> IngestResult<Option<ScheduleDefinition>> {
        let row = sqlx::query_as::<_, ScheduleDefinition>(
            r#"
            SELECT id, name, remote_path, cadence, is_active
            FROM parsing_schedules
            WHERE id = $1 AND is_active
            "#,
        )
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
