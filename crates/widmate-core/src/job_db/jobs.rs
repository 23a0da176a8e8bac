//! Job row read/write.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::JobDb;
use crate::jobs::{JobId, JobRecord, JobStatus};

impl JobDb {
    /// Insert or replace a job row. An older snapshot never overwrites a newer one.
    pub async fn upsert_job(&self, job: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, source_url, status, progress, speed, eta,
                downloaded_bytes, total_bytes, output_path, error,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                speed = excluded.speed,
                eta = excluded.eta,
                downloaded_bytes = excluded.downloaded_bytes,
                total_bytes = excluded.total_bytes,
                output_path = excluded.output_path,
                error = excluded.error,
                updated_at = excluded.updated_at
            WHERE excluded.updated_at >= jobs.updated_at
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.source_url)
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(&job.speed)
        .bind(&job.eta)
        .bind(job.downloaded_bytes as i64)
        .bind(job.total_bytes.map(|n| n as i64))
        .bind(&job.output_path)
        .bind(&job.error)
        .bind(job.created_at.timestamp_micros())
        .bind(job.updated_at.timestamp_micros())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove job rows. Returns the number removed.
    pub async fn delete_jobs(&self, ids: &[JobId]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for id in ids {
            let r = sqlx::query("DELETE FROM jobs WHERE id = ?1")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
            removed += r.rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    /// All persisted jobs, oldest first.
    pub async fn load_jobs(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, source_url, status, progress, speed, eta,
                downloaded_bytes, total_bytes, output_path, error,
                created_at, updated_at
            FROM jobs
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match row_to_record(&row) {
                Ok(job) => out.push(job),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable job row"),
            }
        }
        Ok(out)
    }
}

fn micros_to_utc(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).context("timestamp out of range")
}

fn row_to_record(row: &SqliteRow) -> Result<JobRecord> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let downloaded: i64 = row.try_get("downloaded_bytes")?;
    let total: Option<i64> = row.try_get("total_bytes")?;
    Ok(JobRecord {
        id: id.parse().with_context(|| format!("bad job id {id:?}"))?,
        source_url: row.try_get("source_url")?,
        status: JobStatus::from_str(&status),
        progress: row.try_get("progress")?,
        speed: row.try_get("speed")?,
        eta: row.try_get("eta")?,
        downloaded_bytes: downloaded.max(0) as u64,
        total_bytes: total.map(|n| n.max(0) as u64),
        output_path: row.try_get("output_path")?,
        error: row.try_get("error")?,
        created_at: micros_to_utc(row.try_get("created_at")?)?,
        updated_at: micros_to_utc(row.try_get("updated_at")?)?,
    })
}
