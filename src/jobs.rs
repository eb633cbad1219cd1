//! Persistent job queue backed by a transactional SQLite store.
//!
//! Durable, multi-producer, single-consumer (more consumers are allowed: the
//! `pending → running` transition is atomic and keyed on id plus prior
//! status, so only one claimer wins). Jobs are selected highest-priority
//! first, oldest first within a priority.

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use crate::db;
use crate::migrate;
use crate::models::{Job, JobStatus};

/// Queue metrics for `jobs stats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStats {
    pub counts_by_status: HashMap<String, i64>,
    pub total: i64,
    /// Completed / (completed + failed), in percent.
    pub success_rate: f64,
    pub avg_latency_seconds: f64,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
}

impl JobQueue {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::migrate_jobs(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert a new pending job. Priority is clamped to 1–10.
    pub async fn submit(&self, job_type: &str, params: Value, priority: i64) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let priority = priority.clamp(1, 10);
        sqlx::query(
            r#"
            INSERT INTO jobs (id, type, status, priority, params, created_at)
            VALUES (?, ?, 'pending', ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(job_type)
        .bind(priority)
        .bind(params.to_string())
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_job(&r)))
    }

    /// The highest-priority oldest pending job, without mutating state.
    pub async fn next(&self) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE status = 'pending'
            ORDER BY priority DESC, created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_job(&r)))
    }

    /// Atomic `pending → running` claim. False when another consumer won.
    pub async fn start(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'running', started_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_progress(&self, id: &str, progress: i64, status: Option<JobStatus>) -> Result<()> {
        let progress = progress.clamp(0, 100);
        match status {
            Some(status) => {
                sqlx::query("UPDATE jobs SET progress = ?, status = ? WHERE id = ?")
                    .bind(progress)
                    .bind(status.as_str())
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("UPDATE jobs SET progress = ? WHERE id = ?")
                    .bind(progress)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn complete(&self, id: &str, result: Value) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', progress = 100, result = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(result.to_string())
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', error = ?, finished_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cancel a pending or running job. False when the job is already
    /// terminal (or absent).
    pub async fn cancel(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'cancelled', finished_at = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_job).collect())
    }

    pub async fn stats(&self) -> Result<JobStats> {
        let count_rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let counts_by_status: HashMap<String, i64> = count_rows
            .iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
            .collect();

        let total: i64 = counts_by_status.values().sum();
        let completed = counts_by_status.get("completed").copied().unwrap_or(0);
        let failed = counts_by_status.get("failed").copied().unwrap_or(0);
        let success_rate = if completed + failed > 0 {
            completed as f64 / (completed + failed) as f64 * 100.0
        } else {
            0.0
        };

        // Latency over the most recent completed jobs.
        let latency_rows = sqlx::query(
            r#"
            SELECT started_at, finished_at FROM jobs
            WHERE status = 'completed' AND started_at IS NOT NULL AND finished_at IS NOT NULL
            ORDER BY finished_at DESC
            LIMIT 100
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut latencies = Vec::new();
        for row in &latency_rows {
            let started: String = row.get("started_at");
            let finished: String = row.get("finished_at");
            if let (Ok(s), Ok(f)) = (
                chrono::DateTime::parse_from_rfc3339(&started),
                chrono::DateTime::parse_from_rfc3339(&finished),
            ) {
                latencies.push((f - s).num_milliseconds() as f64 / 1000.0);
            }
        }
        let avg_latency_seconds = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        Ok(JobStats {
            counts_by_status,
            total,
            success_rate,
            avg_latency_seconds,
        })
    }

    /// Delete terminal jobs older than `days`. Returns how many were removed.
    pub async fn cleanup_old(&self, days: i64) -> Result<u64> {
        let cutoff =
            (Utc::now() - chrono::Duration::days(days)).to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        let result = sqlx::query(
            "DELETE FROM jobs WHERE finished_at IS NOT NULL AND finished_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn now() -> String {
    // Fixed-width timestamps keep lexicographic SQL comparisons correct.
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Job {
    let status_str: String = row.get("status");
    let params_str: String = row.get("params");
    let result_str: Option<String> = row.get("result");
    Job {
        id: row.get("id"),
        job_type: row.get("type"),
        status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Pending),
        priority: row.get("priority"),
        params: serde_json::from_str(&params_str).unwrap_or(Value::Null),
        result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
        error: row.get("error"),
        progress: row.get("progress"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
    }
}
