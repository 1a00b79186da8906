//! The durable job queue.
//!
//! All mutations are single-statement conditional updates, so racing
//! workers never need table locks: a claim's `UPDATE … WHERE id = ? AND
//! status = 'PENDING'` elects exactly one winner, and `extend_lock` only
//! touches a RUNNING job still owned by the caller.
//!
//! Callers pass `now` explicitly. That keeps the backoff arithmetic
//! testable and matches the `extend_lock(job, worker, now)` contract.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::Row;
use tracing::{info, warn};

use brandbrain_protocol::{BrandId, CompileRunId, JobId, JobStatus, JobType};

use crate::error::{DbError, Result};
use crate::types::Job;
use crate::{decode_ts, decode_ts_opt, encode_ts, BrandBrainDb};

/// Retry backoff: `delay = base · multiplier^attempts` seconds, where
/// `attempts` is the post-claim counter. With the defaults (30 s, ×2) the
/// first retry waits 60 s, then 120 s, then 240 s.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_seconds: i64,
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_seconds: 30,
            multiplier: 2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, given the attempts already consumed.
    pub fn delay_after(&self, attempts: i32) -> Duration {
        let exponent = attempts.max(0).min(16) as u32;
        Duration::seconds(self.base_seconds * i64::from(self.multiplier.pow(exponent)))
    }
}

/// A job returned to PENDING (or failed) by the stale sweep, with the lease
/// it was holding when it went stale.
#[derive(Debug, Clone)]
pub struct StaleRelease {
    pub job_id: JobId,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub new_status: JobStatus,
}

impl BrandBrainDb {
    // ========================================================================
    // Enqueue & claim
    // ========================================================================

    /// Insert a PENDING job, claimable immediately.
    pub async fn enqueue_job(
        &self,
        brand_id: &BrandId,
        compile_run_id: &CompileRunId,
        params: &Value,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let job = Job {
            id: JobId::new(),
            brand_id: brand_id.clone(),
            compile_run_id: compile_run_id.clone(),
            job_type: JobType::Compile,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            locked_at: None,
            locked_by: None,
            available_at: now,
            params: params.clone(),
            last_error: None,
            created_at: now,
            finished_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO bb_jobs
                (id, brand_id, compile_run_id, job_type, status, attempts, max_attempts,
                 locked_at, locked_by, available_at, params_json, last_error, created_at, finished_at)
            VALUES (?, ?, ?, ?, 'PENDING', 0, ?, NULL, NULL, ?, ?, NULL, ?, NULL)
            "#,
        )
        .bind(job.id.as_str())
        .bind(brand_id.as_str())
        .bind(compile_run_id.as_str())
        .bind(job.job_type.as_str())
        .bind(max_attempts)
        .bind(encode_ts(now))
        .bind(params.to_string())
        .bind(encode_ts(now))
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    /// Atomically claim the next available job.
    ///
    /// Selects the oldest claimable candidate, then issues a conditional
    /// update; the worker whose update reports `rows_affected = 1` owns the
    /// job. A loser of the race reports no claim rather than retrying.
    pub async fn claim_next_job(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let candidate: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM bb_jobs
            WHERE status = 'PENDING' AND available_at <= ?
            ORDER BY available_at ASC, created_at ASC
            LIMIT 1
            "#,
        )
        .bind(encode_ts(now))
        .fetch_optional(&self.pool)
        .await?;

        let Some(job_id) = candidate else {
            return Ok(None);
        };

        let rows_affected = sqlx::query(
            r#"
            UPDATE bb_jobs SET
                status = 'RUNNING',
                locked_at = ?,
                locked_by = ?,
                attempts = attempts + 1
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(encode_ts(now))
        .bind(worker_id)
        .bind(&job_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Another worker won the race.
            return Ok(None);
        }

        let job_id = JobId::parse(&job_id).map_err(|e| DbError::invalid_state(e.to_string()))?;
        let job = self
            .get_job(&job_id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("Job {job_id} vanished after claim")))?;
        info!("Claimed job {} (attempt {})", job.id, job.attempts);
        Ok(Some(job))
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM bb_jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    // ========================================================================
    // Lease maintenance
    // ========================================================================

    /// Extend the lease on a RUNNING job owned by `worker_id`.
    ///
    /// Returns true on extension; false for wrong owner, wrong status, or a
    /// missing job. Never an error the heartbeat would crash on.
    pub async fn extend_lock(
        &self,
        job_id: &JobId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE bb_jobs SET locked_at = ?
            WHERE id = ? AND status = 'RUNNING' AND locked_by = ?
            "#,
        )
        .bind(encode_ts(now))
        .bind(job_id.as_str())
        .bind(worker_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }

    // ========================================================================
    // Completion & failure
    // ========================================================================

    /// Mark a RUNNING job SUCCEEDED. A second completion is a conflict.
    pub async fn complete_job(&self, job_id: &JobId, now: DateTime<Utc>) -> Result<()> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE bb_jobs SET
                status = 'SUCCEEDED',
                locked_at = NULL,
                locked_by = NULL,
                finished_at = ?
            WHERE id = ? AND status = 'RUNNING'
            "#,
        )
        .bind(encode_ts(now))
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DbError::invalid_state(format!(
                "Job {job_id} is not RUNNING; refusing completion"
            )));
        }
        info!("Job {} completed", job_id);
        Ok(())
    }

    /// Fail a RUNNING job: back to PENDING with backoff while attempts
    /// remain, FAILED otherwise. Returns the resulting status.
    pub async fn fail_job(
        &self,
        job_id: &JobId,
        error: &str,
        policy: BackoffPolicy,
        now: DateTime<Utc>,
    ) -> Result<JobStatus> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT attempts, max_attempts FROM bb_jobs WHERE id = ? AND status = 'RUNNING'",
        )
        .bind(job_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Err(DbError::invalid_state(format!(
                "Job {job_id} is not RUNNING; refusing failure"
            )));
        };

        let attempts: i32 = row.get("attempts");
        let max_attempts: i32 = row.get("max_attempts");

        let new_status = if attempts < max_attempts {
            let available_at = now + policy.delay_after(attempts);
            sqlx::query(
                r#"
                UPDATE bb_jobs SET
                    status = 'PENDING',
                    locked_at = NULL,
                    locked_by = NULL,
                    available_at = ?,
                    last_error = ?
                WHERE id = ?
                "#,
            )
            .bind(encode_ts(available_at))
            .bind(error)
            .bind(job_id.as_str())
            .execute(&mut *tx)
            .await?;
            info!(
                "Job {} failed (attempt {}/{}), retrying at {}",
                job_id,
                attempts,
                max_attempts,
                encode_ts(available_at)
            );
            JobStatus::Pending
        } else {
            sqlx::query(
                r#"
                UPDATE bb_jobs SET
                    status = 'FAILED',
                    locked_at = NULL,
                    locked_by = NULL,
                    last_error = ?,
                    finished_at = ?
                WHERE id = ?
                "#,
            )
            .bind(error)
            .bind(encode_ts(now))
            .bind(job_id.as_str())
            .execute(&mut *tx)
            .await?;
            warn!(
                "Job {} failed permanently after {} attempts: {}",
                job_id, attempts, error
            );
            JobStatus::Failed
        };

        tx.commit().await?;
        Ok(new_status)
    }

    // ========================================================================
    // Stale-lease recovery
    // ========================================================================

    /// Release jobs whose lease expired: RUNNING with
    /// `locked_at < now − threshold`. The original lease is captured before
    /// mutation; attempt accounting follows `fail_job`.
    ///
    /// A job that legitimately outlives the threshold without heartbeats can
    /// be double-executed; the heartbeat is the mitigation, not this sweep.
    pub async fn release_stale_jobs(
        &self,
        threshold: Duration,
        policy: BackoffPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<StaleRelease>> {
        let cutoff = now - threshold;
        let rows = sqlx::query(
            "SELECT id, locked_at, locked_by FROM bb_jobs WHERE status = 'RUNNING' AND locked_at < ?",
        )
        .bind(encode_ts(cutoff))
        .fetch_all(&self.pool)
        .await?;

        let mut released = Vec::new();
        for row in rows {
            let job_id = JobId::parse(row.get::<String, _>("id").as_str())
                .map_err(|e| DbError::invalid_state(e.to_string()))?;
            let locked_at = decode_ts_opt(row.get("locked_at"))?;
            let locked_by: Option<String> = row.get("locked_by");
            warn!(
                "Releasing stale job {} (locked_by={:?}, locked_at={:?})",
                job_id, locked_by, locked_at
            );

            // The job may have completed between the select and here; a
            // conditional failure that no longer applies is skipped.
            match self
                .fail_job(&job_id, "stale lock released", policy, now)
                .await
            {
                Ok(new_status) => released.push(StaleRelease {
                    job_id,
                    locked_by,
                    locked_at,
                    new_status,
                }),
                Err(DbError::InvalidState(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(released)
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let status_str: String = row.get("status");
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown job status: {status_str}")))?;
    let type_str: String = row.get("job_type");
    let job_type = JobType::parse(&type_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown job type: {type_str}")))?;

    Ok(Job {
        id: JobId::parse(row.get::<String, _>("id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        brand_id: BrandId::parse(row.get::<String, _>("brand_id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        compile_run_id: CompileRunId::parse(row.get::<String, _>("compile_run_id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        job_type,
        status,
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        locked_at: decode_ts_opt(row.get("locked_at"))?,
        locked_by: row.get("locked_by"),
        available_at: decode_ts(row.get::<String, _>("available_at").as_str())?,
        params: serde_json::from_str(row.get::<String, _>("params_json").as_str())?,
        last_error: row.get("last_error"),
        created_at: decode_ts(row.get::<String, _>("created_at").as_str())?,
        finished_at: decode_ts_opt(row.get("finished_at"))?,
    })
}
