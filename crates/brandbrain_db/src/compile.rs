//! Compile runs and snapshots.

use chrono::{DateTime, Utc};
use sqlx::Row;

use brandbrain_protocol::{
    BrandId, BundleId, CompileRunId, CompileStatus, EvidenceStatus, SnapshotId,
};

use crate::error::{DbError, Result};
use crate::types::{CompileRun, Snapshot};
use crate::{decode_ts, decode_ts_opt, encode_ts, BrandBrainDb};

impl BrandBrainDb {
    // ========================================================================
    // Compile runs
    // ========================================================================

    pub async fn insert_compile_run(&self, run: &CompileRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bb_compile_runs
                (id, brand_id, status, prompt_version, model, input_hash,
                 onboarding_json, bundle_id, evidence_status_json, draft_json,
                 qa_report_json, error, started_at, finished_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.as_str())
        .bind(run.brand_id.as_str())
        .bind(run.status.as_str())
        .bind(&run.prompt_version)
        .bind(&run.model)
        .bind(&run.input_hash)
        .bind(run.onboarding_snapshot.to_string())
        .bind(run.bundle_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(
            run.evidence_status
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(run.draft.as_ref().map(|d| d.to_string()))
        .bind(run.qa_report.as_ref().map(|q| q.to_string()))
        .bind(&run.error)
        .bind(run.started_at.map(encode_ts))
        .bind(run.finished_at.map(encode_ts))
        .bind(encode_ts(run.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Tenant-scoped lookup. A run owned by a different brand is "not
    /// found"; this is the sole data-isolation mechanism.
    pub async fn get_compile_run(
        &self,
        id: &CompileRunId,
        brand_id: &BrandId,
    ) -> Result<Option<CompileRun>> {
        let row = sqlx::query("SELECT * FROM bb_compile_runs WHERE id = ? AND brand_id = ?")
            .bind(id.as_str())
            .bind(brand_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_compile_run).transpose()
    }

    /// Transition PENDING → RUNNING when a worker picks the run up.
    pub async fn mark_compile_run_running(
        &self,
        id: &CompileRunId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE bb_compile_runs SET status = 'RUNNING', started_at = ? WHERE id = ?",
        )
        .bind(encode_ts(now))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Finish a run successfully with its outputs.
    #[allow(clippy::too_many_arguments)]
    pub async fn complete_compile_run(
        &self,
        id: &CompileRunId,
        bundle_id: &BundleId,
        evidence_status: &EvidenceStatus,
        draft: &serde_json::Value,
        qa_report: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bb_compile_runs SET
                status = 'SUCCEEDED',
                bundle_id = ?,
                evidence_status_json = ?,
                draft_json = ?,
                qa_report_json = ?,
                error = NULL,
                finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(bundle_id.as_str())
        .bind(serde_json::to_string(evidence_status)?)
        .bind(draft.to_string())
        .bind(qa_report.to_string())
        .bind(encode_ts(now))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Finish a run with an error, keeping whatever evidence status was
    /// accumulated before the failure.
    pub async fn fail_compile_run(
        &self,
        id: &CompileRunId,
        error: &str,
        evidence_status: Option<&EvidenceStatus>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bb_compile_runs SET
                status = 'FAILED',
                evidence_status_json = COALESCE(?, evidence_status_json),
                error = ?,
                finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(evidence_status.map(serde_json::to_string).transpose()?)
        .bind(error)
        .bind(encode_ts(now))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bb_snapshots (id, brand_id, compile_run_id, snapshot_json, diff_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.id.as_str())
        .bind(snapshot.brand_id.as_str())
        .bind(snapshot.compile_run_id.as_str())
        .bind(snapshot.snapshot.to_string())
        .bind(snapshot.diff.to_string())
        .bind(encode_ts(snapshot.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The authoritative latest snapshot: greatest created_at, ties broken
    /// by id for a stable read.
    pub async fn latest_snapshot(&self, brand_id: &BrandId) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM bb_snapshots
            WHERE brand_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(brand_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_snapshot).transpose()
    }

    /// Snapshot produced by a given compile run, if it succeeded.
    pub async fn get_snapshot_for_run(
        &self,
        compile_run_id: &CompileRunId,
    ) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            "SELECT * FROM bb_snapshots WHERE compile_run_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(compile_run_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_snapshot).transpose()
    }

    /// One page of snapshot history, newest first, plus the total count.
    pub async fn snapshot_history(
        &self,
        brand_id: &BrandId,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<Snapshot>, u32)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bb_snapshots WHERE brand_id = ?")
            .bind(brand_id.as_str())
            .fetch_one(&self.pool)
            .await?;

        let offset = (page.saturating_sub(1) as i64) * page_size as i64;
        let rows = sqlx::query(
            r#"
            SELECT * FROM bb_snapshots
            WHERE brand_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(brand_id.as_str())
        .bind(page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let snapshots = rows
            .iter()
            .map(row_to_snapshot)
            .collect::<Result<Vec<_>>>()?;
        Ok((snapshots, total as u32))
    }
}

fn row_to_compile_run(row: &sqlx::sqlite::SqliteRow) -> Result<CompileRun> {
    let status_str: String = row.get("status");
    let status = CompileStatus::parse(&status_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown compile status: {status_str}")))?;

    let evidence_status = row
        .get::<Option<String>, _>("evidence_status_json")
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    let draft = row
        .get::<Option<String>, _>("draft_json")
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    let qa_report = row
        .get::<Option<String>, _>("qa_report_json")
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    let bundle_id = row
        .get::<Option<String>, _>("bundle_id")
        .as_deref()
        .map(BundleId::parse)
        .transpose()
        .map_err(|e| DbError::invalid_state(e.to_string()))?;

    Ok(CompileRun {
        id: CompileRunId::parse(row.get::<String, _>("id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        brand_id: BrandId::parse(row.get::<String, _>("brand_id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        status,
        prompt_version: row.get("prompt_version"),
        model: row.get("model"),
        input_hash: row.get("input_hash"),
        onboarding_snapshot: serde_json::from_str(
            row.get::<String, _>("onboarding_json").as_str(),
        )?,
        bundle_id,
        evidence_status,
        draft,
        qa_report,
        error: row.get("error"),
        started_at: decode_ts_opt(row.get("started_at"))?,
        finished_at: decode_ts_opt(row.get("finished_at"))?,
        created_at: decode_ts(row.get::<String, _>("created_at").as_str())?,
    })
}

fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> Result<Snapshot> {
    Ok(Snapshot {
        id: SnapshotId::parse(row.get::<String, _>("id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        brand_id: BrandId::parse(row.get::<String, _>("brand_id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        compile_run_id: CompileRunId::parse(row.get::<String, _>("compile_run_id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        snapshot: serde_json::from_str(row.get::<String, _>("snapshot_json").as_str())?,
        diff: serde_json::from_str(row.get::<String, _>("diff_json").as_str())?,
        created_at: decode_ts(row.get::<String, _>("created_at").as_str())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Brand;
    use serde_json::json;

    async fn seed_brand(db: &BrandBrainDb) -> BrandId {
        let brand = Brand {
            id: BrandId::new(),
            org_id: "org-1".to_string(),
            name: "Acme".to_string(),
            slug: "acme".to_string(),
            deleted_at: None,
        };
        db.create_brand(&brand).await.unwrap();
        brand.id
    }

    fn pending_run(brand_id: &BrandId, created_at: DateTime<Utc>) -> CompileRun {
        CompileRun {
            id: CompileRunId::new(),
            brand_id: brand_id.clone(),
            status: CompileStatus::Pending,
            prompt_version: "v1".to_string(),
            model: "stub".to_string(),
            input_hash: "deadbeef".to_string(),
            onboarding_snapshot: json!({}),
            bundle_id: None,
            evidence_status: None,
            draft: None,
            qa_report: None,
            error: None,
            started_at: None,
            finished_at: None,
            created_at,
        }
    }

    fn snapshot_for(run: &CompileRun, created_at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            id: SnapshotId::new(),
            brand_id: run.brand_id.clone(),
            compile_run_id: run.id.clone(),
            snapshot: json!({"identity": {"name": "Acme"}}),
            diff: json!({}),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_cross_tenant_lookup_is_not_found() {
        let db = BrandBrainDb::open_memory().await.unwrap();
        let brand_a = seed_brand(&db).await;
        let brand_b = seed_brand(&db).await;

        let run = pending_run(&brand_a, Utc::now());
        db.insert_compile_run(&run).await.unwrap();

        assert!(db.get_compile_run(&run.id, &brand_a).await.unwrap().is_some());
        assert!(db.get_compile_run(&run.id, &brand_b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_snapshot_is_greatest_created_at() {
        let db = BrandBrainDb::open_memory().await.unwrap();
        let brand_id = seed_brand(&db).await;
        let now = Utc::now();

        let run = pending_run(&brand_id, now);
        db.insert_compile_run(&run).await.unwrap();

        let old = snapshot_for(&run, now - chrono::Duration::hours(2));
        let new = snapshot_for(&run, now);
        db.insert_snapshot(&old).await.unwrap();
        db.insert_snapshot(&new).await.unwrap();

        let latest = db.latest_snapshot(&brand_id).await.unwrap().unwrap();
        assert_eq!(latest.id, new.id);
    }

    #[tokio::test]
    async fn test_history_pagination() {
        let db = BrandBrainDb::open_memory().await.unwrap();
        let brand_id = seed_brand(&db).await;
        let now = Utc::now();

        let run = pending_run(&brand_id, now);
        db.insert_compile_run(&run).await.unwrap();
        for i in 0..5 {
            db.insert_snapshot(&snapshot_for(&run, now + chrono::Duration::seconds(i)))
                .await
                .unwrap();
        }

        let (page1, total) = db.snapshot_history(&brand_id, 1, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page1.len(), 2);
        let (page3, _) = db.snapshot_history(&brand_id, 3, 2).await.unwrap();
        assert_eq!(page3.len(), 1);
        // Newest first.
        assert!(page1[0].created_at >= page1[1].created_at);
    }

    #[tokio::test]
    async fn test_compile_run_lifecycle() {
        let db = BrandBrainDb::open_memory().await.unwrap();
        let brand_id = seed_brand(&db).await;
        let now = Utc::now();

        let run = pending_run(&brand_id, now);
        db.insert_compile_run(&run).await.unwrap();
        db.mark_compile_run_running(&run.id, now).await.unwrap();

        let loaded = db.get_compile_run(&run.id, &brand_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CompileStatus::Running);
        assert!(loaded.started_at.is_some());

        db.fail_compile_run(&run.id, "actor exploded", None, now)
            .await
            .unwrap();
        let loaded = db.get_compile_run(&run.id, &brand_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CompileStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("actor exploded"));
    }
}
