//! End-to-end compile scenarios against an in-memory database and a
//! scripted actor client.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};

use brandbrain_apify::mock::{MockActorClient, ScriptedRun};
use brandbrain_compile::{
    CompileError, CompileService, CompileWorker, IncludeSet, KickoffOutcome, OverridesPatch,
    PollOutcome, StubDraftProducer,
};
use brandbrain_db::{Brand, BrandBrainDb, SourceConnection};
use brandbrain_protocol::{
    ActorRunStatus, BrandBrainConfig, BrandId, Capability, CompileRunId, CompileStatus, JobStatus,
    Platform, SourceConnectionId,
};

struct Harness {
    db: BrandBrainDb,
    client: Arc<MockActorClient>,
    service: CompileService,
    worker: CompileWorker,
}

async fn harness() -> Harness {
    let db = BrandBrainDb::open_memory().await.unwrap();
    let mut config = BrandBrainConfig::default();
    config.actor_poll_timeout_s = 1;
    config.actor_poll_interval_s = 1;
    let config = Arc::new(config);
    let client = Arc::new(MockActorClient::new());
    let service = CompileService::new(db.clone(), config.clone());
    let worker = CompileWorker::new(
        db.clone(),
        client.clone(),
        config.clone(),
        Arc::new(StubDraftProducer),
        "worker-test-1".to_string(),
    );
    Harness {
        db,
        client,
        service,
        worker,
    }
}

async fn seed_brand(db: &BrandBrainDb) -> BrandId {
    let brand = Brand {
        id: BrandId::new(),
        org_id: "org-1".to_string(),
        name: "Acme".to_string(),
        slug: format!("acme-{}", BrandId::new()),
        deleted_at: None,
    };
    db.create_brand(&brand).await.unwrap();
    brand.id
}

async fn seed_onboarding(db: &BrandBrainDb, brand_id: &BrandId) {
    db.upsert_onboarding(
        brand_id,
        0,
        &json!({
            "brand_name": "Acme",
            "value_prop": "Rocket-powered anvils",
            "target_audience": "Coyotes",
            "tone": "bold"
        }),
        Utc::now(),
    )
    .await
    .unwrap();
}

async fn seed_source(db: &BrandBrainDb, brand_id: &BrandId) -> SourceConnection {
    let now = Utc::now();
    let sc = SourceConnection {
        id: SourceConnectionId::new(),
        brand_id: brand_id.clone(),
        platform: Platform::Instagram,
        capability: Capability::Posts,
        identifier: "acme".to_string(),
        is_enabled: true,
        settings: json!({}),
        created_at: now,
        updated_at: now,
    };
    db.upsert_source_connection(&sc).await.unwrap();
    sc
}

async fn seed_ready_brand(db: &BrandBrainDb) -> BrandId {
    let brand_id = seed_brand(db).await;
    seed_onboarding(db, &brand_id).await;
    seed_source(db, &brand_id).await;
    brand_id
}

fn ig_item(n: u32) -> Value {
    json!({
        "id": format!("post-{n}"),
        "url": format!("https://www.instagram.com/p/post-{n}/"),
        "timestamp": "2026-03-01T10:00:00+00:00",
        "likesCount": 10 * n,
        "commentsCount": n,
        "caption": format!("caption {n}")
    })
}

async fn compile_run_count(db: &BrandBrainDb) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM bb_compile_runs")
        .fetch_one(db.pool())
        .await
        .unwrap()
}

async fn job_count(db: &BrandBrainDb) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM bb_jobs")
        .fetch_one(db.pool())
        .await
        .unwrap()
}

fn enqueued_run_id(outcome: KickoffOutcome) -> CompileRunId {
    match outcome {
        KickoffOutcome::Enqueued { compile_run_id, .. } => compile_run_id,
        other => panic!("expected Enqueued, got {other:?}"),
    }
}

#[tokio::test]
async fn test_kickoff_then_worker_succeeds() {
    let h = harness().await;
    let brand_id = seed_ready_brand(&h.db).await;
    h.client
        .enqueue(ScriptedRun::succeeded(vec![ig_item(1), ig_item(2), ig_item(3)]));

    let outcome = h.service.kickoff(&brand_id, false).await.unwrap();
    let run_id = enqueued_run_id(outcome);

    // Kickoff never touches the actor.
    assert!(h.client.started_runs().is_empty());

    let status = h.service.get_status(&brand_id, &run_id).await.unwrap();
    assert_eq!(status.status, CompileStatus::Pending);
    assert!(status.snapshot.is_none());

    let processed = h.worker.poll_once(false).await.unwrap();
    assert!(matches!(
        processed,
        PollOutcome::Processed {
            status: JobStatus::Succeeded,
            ..
        }
    ));

    let status = h.service.get_status(&brand_id, &run_id).await.unwrap();
    assert_eq!(status.status, CompileStatus::Succeeded);
    let snapshot = status.snapshot.expect("succeeded status carries snapshot");
    assert_eq!(snapshot.snapshot_json["identity"]["name"], "Acme");

    let evidence = status.evidence_status.expect("evidence status present");
    assert_eq!(evidence.refreshed.len(), 1);
    assert_eq!(evidence.refreshed[0].source, "instagram.posts");
    assert_eq!(evidence.refreshed[0].raw_items_count, 3);
    assert_eq!(evidence.refreshed[0].normalized_created, 3);
}

#[tokio::test]
async fn test_unchanged_short_circuit() {
    let h = harness().await;
    let brand_id = seed_ready_brand(&h.db).await;
    h.client.enqueue(ScriptedRun::succeeded(vec![ig_item(1)]));

    // First compile produces the snapshot.
    let run_id = enqueued_run_id(h.service.kickoff(&brand_id, false).await.unwrap());
    h.worker.poll_once(false).await.unwrap();
    let first = h.service.get_status(&brand_id, &run_id).await.unwrap();
    let first_snapshot_id = first.snapshot.unwrap().snapshot_id;

    let runs_before = compile_run_count(&h.db).await;
    let jobs_before = job_count(&h.db).await;

    // Same inputs, fresh cached run: UNCHANGED, nothing written.
    let outcome = h.service.kickoff(&brand_id, false).await.unwrap();
    match outcome {
        KickoffOutcome::Unchanged { snapshot } => {
            assert_eq!(snapshot.id.to_string(), first_snapshot_id);
        }
        other => panic!("expected Unchanged, got {other:?}"),
    }
    assert_eq!(compile_run_count(&h.db).await, runs_before);
    assert_eq!(job_count(&h.db).await, jobs_before);
}

#[tokio::test]
async fn test_force_refresh_bypasses_short_circuit() {
    let h = harness().await;
    let brand_id = seed_ready_brand(&h.db).await;
    h.client.enqueue(ScriptedRun::succeeded(vec![ig_item(1)]));

    enqueued_run_id(h.service.kickoff(&brand_id, false).await.unwrap());
    h.worker.poll_once(false).await.unwrap();

    h.client.enqueue(ScriptedRun::succeeded(vec![ig_item(1)]));
    let outcome = h.service.kickoff(&brand_id, true).await.unwrap();
    assert!(matches!(outcome, KickoffOutcome::Enqueued { .. }));
}

#[tokio::test]
async fn test_changed_onboarding_defeats_short_circuit() {
    let h = harness().await;
    let brand_id = seed_ready_brand(&h.db).await;
    h.client.enqueue(ScriptedRun::succeeded(vec![ig_item(1)]));

    enqueued_run_id(h.service.kickoff(&brand_id, false).await.unwrap());
    h.worker.poll_once(false).await.unwrap();

    // Changing an answer changes the input hash.
    h.db.upsert_onboarding(
        &brand_id,
        0,
        &json!({
            "brand_name": "Acme",
            "value_prop": "Quieter anvils",
            "target_audience": "Coyotes"
        }),
        Utc::now(),
    )
    .await
    .unwrap();

    let outcome = h.service.kickoff(&brand_id, false).await.unwrap();
    assert!(matches!(outcome, KickoffOutcome::Enqueued { .. }));
}

#[tokio::test]
async fn test_gating_failure_creates_nothing() {
    let h = harness().await;
    let brand_id = seed_brand(&h.db).await;
    seed_onboarding(&h.db, &brand_id).await;
    // No enabled sources.

    let err = h.service.kickoff(&brand_id, false).await.unwrap_err();
    match err {
        CompileError::Gating(errors) => {
            assert!(errors.iter().any(|e| e.code == "NO_ENABLED_SOURCES"));
        }
        other => panic!("expected Gating, got {other:?}"),
    }
    assert_eq!(compile_run_count(&h.db).await, 0);
    assert_eq!(job_count(&h.db).await, 0);
}

#[tokio::test]
async fn test_gating_reports_incomplete_onboarding() {
    let h = harness().await;
    let brand_id = seed_brand(&h.db).await;
    seed_source(&h.db, &brand_id).await;
    h.db.upsert_onboarding(&brand_id, 0, &json!({"brand_name": "  "}), Utc::now())
        .await
        .unwrap();

    let err = h.service.kickoff(&brand_id, false).await.unwrap_err();
    match err {
        CompileError::Gating(errors) => {
            assert!(errors.iter().any(|e| e.code == "ONBOARDING_INCOMPLETE"));
        }
        other => panic!("expected Gating, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cross_tenant_status_is_not_found() {
    let h = harness().await;
    let brand_a = seed_ready_brand(&h.db).await;
    let brand_b = seed_ready_brand(&h.db).await;
    h.client.enqueue(ScriptedRun::succeeded(vec![ig_item(1)]));

    let run_id = enqueued_run_id(h.service.kickoff(&brand_a, false).await.unwrap());

    let err = h.service.get_status(&brand_b, &run_id).await.unwrap_err();
    assert!(matches!(err, CompileError::NotFound(_)));
}

#[tokio::test]
async fn test_source_failure_is_recorded_not_fatal() {
    let h = harness().await;
    let brand_id = seed_ready_brand(&h.db).await;
    h.client.enqueue(ScriptedRun::never_finishes());

    let run_id = enqueued_run_id(h.service.kickoff(&brand_id, false).await.unwrap());
    let processed = h.worker.poll_once(false).await.unwrap();
    assert!(matches!(
        processed,
        PollOutcome::Processed {
            status: JobStatus::Succeeded,
            ..
        }
    ));

    let status = h.service.get_status(&brand_id, &run_id).await.unwrap();
    assert_eq!(status.status, CompileStatus::Succeeded);
    let evidence = status.evidence_status.unwrap();
    assert_eq!(evidence.failed.len(), 1);
    assert_eq!(
        evidence.failed[0].apify_run_status,
        Some(ActorRunStatus::TimedOut)
    );
}

#[tokio::test]
async fn test_reuse_path_records_cached_run() {
    let h = harness().await;
    let brand_id = seed_ready_brand(&h.db).await;
    h.client.enqueue(ScriptedRun::succeeded(vec![ig_item(1)]));

    enqueued_run_id(h.service.kickoff(&brand_id, false).await.unwrap());
    h.worker.poll_once(false).await.unwrap();

    // Force a second compile without changing sources; the cached actor run
    // is inside the TTL, so the source is reused, not re-scraped.
    let run_id = enqueued_run_id(h.service.kickoff(&brand_id, true).await.unwrap());
    h.worker.poll_once(false).await.unwrap();

    let status = h.service.get_status(&brand_id, &run_id).await.unwrap();
    assert_eq!(status.status, CompileStatus::Succeeded);
    let evidence = status.evidence_status.unwrap();
    // force_refresh forces re-ingestion, so this lands in refreshed.
    assert_eq!(evidence.refreshed.len() + evidence.reused.len(), 1);
}

#[tokio::test]
async fn test_dry_run_completes_without_executing() {
    let h = harness().await;
    let brand_id = seed_ready_brand(&h.db).await;

    let run_id = enqueued_run_id(h.service.kickoff(&brand_id, false).await.unwrap());
    let processed = h.worker.poll_once(true).await.unwrap();
    assert!(matches!(
        processed,
        PollOutcome::Processed {
            status: JobStatus::Succeeded,
            ..
        }
    ));

    // The compile run was never executed.
    let status = h.service.get_status(&brand_id, &run_id).await.unwrap();
    assert_eq!(status.status, CompileStatus::Pending);
    assert!(h.client.started_runs().is_empty());
}

#[tokio::test]
async fn test_latest_includes_sections_on_demand() {
    let h = harness().await;
    let brand_id = seed_ready_brand(&h.db).await;
    h.client.enqueue(ScriptedRun::succeeded(vec![ig_item(1)]));

    enqueued_run_id(h.service.kickoff(&brand_id, false).await.unwrap());
    h.worker.poll_once(false).await.unwrap();

    let bare = h
        .service
        .latest(&brand_id, IncludeSet::default())
        .await
        .unwrap();
    assert!(bare.evidence_status.is_none());
    assert!(bare.qa_report.is_none());
    assert!(bare.bundle_summary.is_none());

    let full = h
        .service
        .latest(&brand_id, IncludeSet::parse("full").unwrap())
        .await
        .unwrap();
    assert!(full.evidence_status.is_some());
    assert!(full.qa_report.is_some());
    assert!(full.bundle_summary.is_some());
}

#[tokio::test]
async fn test_latest_without_snapshot_is_not_found() {
    let h = harness().await;
    let brand_id = seed_ready_brand(&h.db).await;
    let err = h
        .service
        .latest(&brand_id, IncludeSet::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CompileError::NotFound(_)));
}

#[tokio::test]
async fn test_history_pages_and_validates() {
    let h = harness().await;
    let brand_id = seed_ready_brand(&h.db).await;

    for _ in 0..3 {
        h.client.enqueue(ScriptedRun::succeeded(vec![ig_item(1)]));
        enqueued_run_id(h.service.kickoff(&brand_id, true).await.unwrap());
        h.worker.poll_once(false).await.unwrap();
    }

    let page = h.service.history(&brand_id, 1, 2).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);

    assert!(matches!(
        h.service.history(&brand_id, 0, 10).await.unwrap_err(),
        CompileError::Validation(_)
    ));
    assert!(matches!(
        h.service.history(&brand_id, 1, 51).await.unwrap_err(),
        CompileError::Validation(_)
    ));
}

#[tokio::test]
async fn test_overrides_merge_and_pinned_replace() {
    let h = harness().await;
    let brand_id = seed_ready_brand(&h.db).await;

    // Empty document before any write.
    let empty = h.service.get_overrides(&brand_id).await.unwrap();
    assert_eq!(empty.overrides_json, json!({}));
    assert!(empty.pinned_paths.is_empty());

    let mut first = Map::new();
    first.insert("voice.tone".to_string(), json!("bold"));
    first.insert("identity.tagline".to_string(), json!("ship it"));
    h.service
        .patch_overrides(
            &brand_id,
            OverridesPatch {
                overrides_json: Some(first),
                pinned_paths: Some(vec!["voice.tone".to_string()]),
            },
        )
        .await
        .unwrap();

    // Second patch merges per key and replaces pinned wholesale.
    let mut second = Map::new();
    second.insert("identity.tagline".to_string(), json!(null));
    second.insert("voice.pace".to_string(), json!("fast"));
    let after = h
        .service
        .patch_overrides(
            &brand_id,
            OverridesPatch {
                overrides_json: Some(second.clone()),
                pinned_paths: Some(vec!["voice.pace".to_string()]),
            },
        )
        .await
        .unwrap();

    assert_eq!(after.overrides_json["voice.tone"], "bold");
    assert_eq!(after.overrides_json["voice.pace"], "fast");
    assert!(after.overrides_json.get("identity.tagline").is_none());
    assert_eq!(after.pinned_paths, vec!["voice.pace".to_string()]);

    // Idempotent: re-applying the same patch is a no-op.
    let again = h
        .service
        .patch_overrides(
            &brand_id,
            OverridesPatch {
                overrides_json: Some(second),
                pinned_paths: Some(vec!["voice.pace".to_string()]),
            },
        )
        .await
        .unwrap();
    assert_eq!(again.overrides_json, after.overrides_json);
    assert_eq!(again.pinned_paths, after.pinned_paths);
}

#[tokio::test]
async fn test_overrides_overlay_snapshot() {
    let h = harness().await;
    let brand_id = seed_ready_brand(&h.db).await;

    let mut patch = Map::new();
    patch.insert("voice.tone".to_string(), json!("pirate"));
    h.service
        .patch_overrides(
            &brand_id,
            OverridesPatch {
                overrides_json: Some(patch),
                pinned_paths: None,
            },
        )
        .await
        .unwrap();

    h.client.enqueue(ScriptedRun::succeeded(vec![ig_item(1)]));
    let run_id = enqueued_run_id(h.service.kickoff(&brand_id, false).await.unwrap());
    h.worker.poll_once(false).await.unwrap();

    let status = h.service.get_status(&brand_id, &run_id).await.unwrap();
    let snapshot = status.snapshot.unwrap();
    assert_eq!(snapshot.snapshot_json["voice"]["tone"], "pirate");
}

#[tokio::test]
async fn test_unknown_brand_is_not_found() {
    let h = harness().await;
    let ghost = BrandId::new();
    let err = h.service.kickoff(&ghost, false).await.unwrap_err();
    assert!(matches!(err, CompileError::NotFound(_)));
}
