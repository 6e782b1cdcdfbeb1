//! Coordination store backed by the `coordination_entries` table.
//!
//! Expiry is evaluated against the database clock so every process sharing
//! the table agrees on which entries are live.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

use super::CoordinationStore;
use crate::ingest::error::{IngestError, IngestResult};

#[derive(Clone)]
pub struct PgCoordinationStore {
    pool: PgPool,
}

impl PgCoordinationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn ttl_secs(ttl: Option<Duration>) -> Option<f64> {
    ttl.map(|t| t.as_secs_f64())
}

fn store_error(e: sqlx::Error) -> IngestError {
    IngestError::Coordination(e.to_string())
}

#[async_trait]
impl CoordinationStore for PgCoordinationStore {
    async fn add(&self, key: &str, value: &str, ttl: Option<Duration>) -> IngestResult<bool> {
        // Takes over an expired row; a live row is left untouched.
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO coordination_entries (key, value, expires_at)
            VALUES ($1, $2, CASE WHEN $3::float8 IS NULL THEN NULL
                                 ELSE NOW() + make_interval(secs => $3::float8) END)
            ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
                WHERE coordination_entries.expires_at IS NOT NULL
                  AND coordination_entries.expires_at <= NOW()
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl_secs(ttl))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> IngestResult<()> {
        sqlx::query(
            r#"
            INSERT INTO coordination_entries (key, value, expires_at)
            VALUES ($1, $2, CASE WHEN $3::float8 IS NULL THEN NULL
                                 ELSE NOW() + make_interval(secs => $3::float8) END)
            ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl_secs(ttl))
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn get(&self, key: &str) -> IngestResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT value FROM coordination_entries
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(|(value,)| value))
    }

    async fn delete(&self, key: &str) -> IngestResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM coordination_entries
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> IngestResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM coordination_entries
            WHERE key = $1 AND value = $2
              AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key)
        .bind(expected)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn refresh(&self, key: &str, expected: &str, ttl: Duration) -> IngestResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE coordination_entries
            SET expires_at = NOW() + make_interval(secs => $3::float8)
            WHERE key = $1 AND value = $2
              AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key)
        .bind(expected)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self) -> IngestResult<u64> {
        let result = sqlx::query("DELETE FROM coordination_entries WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(result.rows_affected())
    }
}
