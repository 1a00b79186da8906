//! The compile worker: the job-time half of the orchestrator.
//!
//! A claimed job runs under a heartbeat: a supervised background task that
//! extends the queue lease at an interval strictly shorter than the stale
//! threshold, and is stopped on every exit path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use brandbrain_apify::ActorClient;
use brandbrain_db::{BackoffPolicy, BrandBrainDb, Job, Snapshot};
use brandbrain_protocol::{
    source_label, EvidenceStatus, FailedSource, JobId, JobStatus, Platform, RefreshedSource,
    ReusedSource, SkippedSource, SnapshotId,
};
use brandbrain_protocol::{ActorRunStatus, BrandBrainConfig};

use crate::draft::{apply_overrides, snapshot_diff, DraftProducer};
use crate::error::{CompileError, Result};
use crate::freshness;
use crate::ingest::{cap_for_stream, Ingestor};
use crate::normalize;
use crate::Bundler;

/// Outcome of one queue poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No claimable job.
    Idle,
    /// A job was claimed and finished with the given terminal/retry status.
    Processed { job_id: JobId, status: JobStatus },
}

pub struct CompileWorker {
    db: BrandBrainDb,
    client: Arc<dyn ActorClient>,
    config: Arc<BrandBrainConfig>,
    draft: Arc<dyn DraftProducer>,
    worker_id: String,
}

impl CompileWorker {
    pub fn new(
        db: BrandBrainDb,
        client: Arc<dyn ActorClient>,
        config: Arc<BrandBrainConfig>,
        draft: Arc<dyn DraftProducer>,
        worker_id: String,
    ) -> Self {
        Self {
            db,
            client,
            config,
            draft,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_seconds: self.config.backoff_base_seconds,
            multiplier: self.config.backoff_multiplier,
        }
    }

    /// Claim and process at most one job.
    ///
    /// With `dry_run`, a claimed job is completed without executing its
    /// compile body.
    pub async fn poll_once(&self, dry_run: bool) -> Result<PollOutcome> {
        let now = Utc::now();
        let Some(job) = self.db.claim_next_job(&self.worker_id, now).await? else {
            return Ok(PollOutcome::Idle);
        };

        if dry_run {
            info!("Dry run: completing job {} without executing", job.id);
            self.db.complete_job(&job.id, Utc::now()).await?;
            return Ok(PollOutcome::Processed {
                job_id: job.id,
                status: JobStatus::Succeeded,
            });
        }

        let heartbeat = self.spawn_heartbeat(job.id.clone());
        let result = self.execute_compile(&job).await;
        heartbeat.stop().await;

        let status = match result {
            Ok(()) => {
                self.db.complete_job(&job.id, Utc::now()).await?;
                JobStatus::Succeeded
            }
            Err(e) => {
                error!("Job {} failed: {}", job.id, e);
                self.db
                    .fail_job(&job.id, &e.to_string(), self.backoff(), Utc::now())
                    .await?
            }
        };
        Ok(PollOutcome::Processed {
            job_id: job.id,
            status,
        })
    }

    /// Periodic sweep for expired leases.
    pub async fn sweep_stale(&self) -> Result<usize> {
        let threshold = chrono::Duration::minutes(self.config.stale_lock_minutes);
        let released = self
            .db
            .release_stale_jobs(threshold, self.backoff(), Utc::now())
            .await?;
        Ok(released.len())
    }

    /// Spawn the per-job heartbeat. Must be stopped on every exit path;
    /// dropping the handle aborts the task as a backstop.
    fn spawn_heartbeat(&self, job_id: JobId) -> HeartbeatHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let db = self.db.clone();
        let worker_id = self.worker_id.clone();
        let interval = Duration::from_secs(self.config.heartbeat_interval_s);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {
                        match db.extend_lock(&job_id, &worker_id, Utc::now()).await {
                            Ok(true) => {}
                            Ok(false) => {
                                warn!("Heartbeat for job {} found lease gone", job_id);
                                break;
                            }
                            Err(e) => warn!("Heartbeat for job {} errored: {}", job_id, e),
                        }
                    }
                }
            }
        });
        HeartbeatHandle {
            stop_tx,
            task: Some(task),
        }
    }

    /// The compile body: sources → evidence status → bundle → draft →
    /// snapshot. Per-source failures are recorded and do not abort the run;
    /// anything escaping this function fails the CompileRun and the job.
    async fn execute_compile(&self, job: &Job) -> Result<()> {
        let result = self.compile_inner(job).await;
        if let Err(e) = &result {
            let message = e.to_string();
            self.db
                .fail_compile_run(&job.compile_run_id, &message, None, Utc::now())
                .await?;
        }
        result
    }

    async fn compile_inner(&self, job: &Job) -> Result<()> {
        let now = Utc::now();
        self.db
            .mark_compile_run_running(&job.compile_run_id, now)
            .await?;
        let run = self
            .db
            .get_compile_run(&job.compile_run_id, &job.brand_id)
            .await?
            .ok_or_else(|| {
                CompileError::NotFound(format!("Compile run {} not found", job.compile_run_id))
            })?;

        let force_refresh = job.force_refresh();
        let ingestor = Ingestor::new(self.db.clone(), self.client.clone(), self.config.clone());
        let mut status = EvidenceStatus::default();

        // Sources are iterated in the stable (platform, capability,
        // identifier) order the DB hands back, so evidence_status is
        // deterministic.
        let sources = self.db.list_enabled_sources(&job.brand_id).await?;
        for sc in &sources {
            let label = source_label(sc.platform, sc.capability);

            if !self.config.is_capability_enabled(sc.platform, sc.capability) {
                status.skipped.push(SkippedSource {
                    source: label,
                    reason: "capability disabled".to_string(),
                });
                continue;
            }

            let freshness = freshness::check_freshness(
                &self.db,
                sc,
                force_refresh,
                self.config.actor_ttl_hours,
                Utc::now(),
            )
            .await?;

            if !freshness.should_refresh {
                // Reuse: make sure NEIs exist from the cached run. The
                // normalization is idempotent, so re-running is safe.
                let cached = freshness.cached_run.as_ref().ok_or_else(|| {
                    CompileError::Unknown("reuse decision without a cached run".to_string())
                })?;
                let cap = cap_for_stream(&self.config, sc.platform, sc.capability)
                    .unwrap_or(self.config.global_max_items);
                match normalize::normalize_actor_run(&self.db, &self.config, &cached.id, cap).await
                {
                    Ok(outcome) => status.reused.push(ReusedSource {
                        source: label,
                        reason: freshness.reason,
                        run_age_hours: freshness.age_hours.unwrap_or(0.0),
                        apify_run_id: cached.apify_run_id.clone().unwrap_or_default(),
                        normalized_created: outcome.created,
                        normalized_updated: outcome.updated,
                    }),
                    Err(CompileError::AdapterMissing(msg)) => {
                        status.failed.push(FailedSource {
                            source: label,
                            reason: "adapter missing for cached run".to_string(),
                            error: msg,
                            apify_run_id: cached.apify_run_id.clone(),
                            apify_run_status: Some(ActorRunStatus::Succeeded),
                        })
                    }
                    Err(e) => return Err(e),
                }
                continue;
            }

            match ingestor.ingest_source(sc).await {
                Ok(result) if result.skipped => status.skipped.push(SkippedSource {
                    source: label,
                    reason: "capability disabled".to_string(),
                }),
                Ok(result) if result.success => status.refreshed.push(RefreshedSource {
                    source: label,
                    reason: freshness.reason,
                    apify_run_id: result.apify_run_id.unwrap_or_default(),
                    apify_run_status: result
                        .apify_run_status
                        .unwrap_or(ActorRunStatus::Succeeded),
                    raw_items_count: result.raw_items_count,
                    normalized_created: result.normalized_created,
                    normalized_updated: result.normalized_updated,
                }),
                Ok(result) => status.failed.push(FailedSource {
                    source: label,
                    reason: freshness.reason.clone(),
                    error: result.error.unwrap_or_else(|| "ingestion failed".to_string()),
                    apify_run_id: result.apify_run_id,
                    apify_run_status: result.apify_run_status,
                }),
                Err(CompileError::AdapterMissing(msg)) => status.failed.push(FailedSource {
                    source: label,
                    reason: freshness.reason.clone(),
                    error: msg,
                    apify_run_id: None,
                    apify_run_status: None,
                }),
                Err(e) => return Err(e),
            }
        }

        // Bundle over the platforms that have enabled sources.
        let mut platforms: Vec<Platform> = sources.iter().map(|sc| sc.platform).collect();
        platforms.sort();
        platforms.dedup();
        let bundler = Bundler::new(self.db.clone(), self.config.clone());
        let bundle = bundler.assemble(&job.brand_id, &platforms, Utc::now()).await?;

        // Draft + QA (stubbed LLM step); the snapshot is the draft with the
        // overrides overlay applied.
        let (draft_doc, qa_report) = self.draft.produce(
            &run.onboarding_snapshot,
            &bundle.summary,
            bundle.item_ids.len(),
        );
        let (overrides, pinned) = match self.db.get_overrides(&job.brand_id).await? {
            Some(doc) => (doc.overrides, doc.pinned_paths),
            None => (json!({}), Vec::new()),
        };
        let mut snapshot_doc = draft_doc.clone();
        apply_overrides(&mut snapshot_doc, &overrides, &pinned);

        let previous = self.db.latest_snapshot(&job.brand_id).await?;
        let diff = previous
            .as_ref()
            .map(|prev| snapshot_diff(&prev.snapshot, &snapshot_doc))
            .unwrap_or_else(|| json!({}));

        let finished = Utc::now();
        self.db
            .complete_compile_run(
                &job.compile_run_id,
                &bundle.id,
                &status,
                &draft_doc,
                &qa_report,
                finished,
            )
            .await?;
        self.db
            .insert_snapshot(&Snapshot {
                id: SnapshotId::new(),
                brand_id: job.brand_id.clone(),
                compile_run_id: job.compile_run_id.clone(),
                snapshot: snapshot_doc,
                diff,
                created_at: finished,
            })
            .await?;

        info!(
            "Compile run {} succeeded: {} refreshed, {} reused, {} skipped, {} failed",
            job.compile_run_id,
            status.refreshed.len(),
            status.reused.len(),
            status.skipped.len(),
            status.failed.len()
        );
        Ok(())
    }
}

/// Handle to a running heartbeat task.
pub struct HeartbeatHandle {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    /// Signal the task to stop and wait for it to wind down.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        // Backstop for paths that never called stop().
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}
