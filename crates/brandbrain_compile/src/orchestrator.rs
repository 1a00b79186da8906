//! The compile orchestrator: kickoff, short-circuit, and the read path
//! (status, latest, history, overrides).
//!
//! Kickoff is latency-sensitive: O(1) bounded DB calls, never an actor
//! call. All lookups are `WHERE id = ? AND brand_id = ?`; a run owned by
//! another brand is "not found".

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;

use brandbrain_db::{BrandBrainDb, CompileRun, Snapshot};
use brandbrain_protocol::{
    gating_codes, BrandBrainConfig, BrandId, CompileRunId, CompileStatus, EvidenceStatus,
    GatingError,
};

use crate::error::{CompileError, Result};
use crate::freshness;

/// Tier-0 question ids that must be answered before a compile may run.
const REQUIRED_TIER0_ANSWERS: [&str; 3] = ["brand_name", "value_prop", "target_audience"];

/// Largest allowed history page.
pub const MAX_PAGE_SIZE: u32 = 50;

/// Outcome of a compile kickoff.
#[derive(Debug)]
pub enum KickoffOutcome {
    /// A compile run was created and enqueued. 202.
    Enqueued {
        compile_run_id: CompileRunId,
        poll_url: String,
    },
    /// Inputs are unchanged; the existing snapshot stands. 200.
    Unchanged { snapshot: Snapshot },
}

/// Status document; shape depends on the run status.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub compile_run_id: CompileRunId,
    pub status: CompileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_status: Option<EvidenceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotRef {
    pub snapshot_id: String,
    pub created_at: String,
    pub snapshot_json: Value,
}

/// Latest-snapshot document; optional sections controlled by `?include=`.
#[derive(Debug, Serialize)]
pub struct LatestResponse {
    pub snapshot_id: String,
    pub compile_run_id: CompileRunId,
    pub created_at: String,
    pub snapshot_json: Value,
    pub diff_json: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_status: Option<EvidenceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qa_report: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_summary: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub page: u32,
    pub page_size: u32,
    pub total: u32,
    pub items: Vec<HistoryItem>,
}

#[derive(Debug, Serialize)]
pub struct HistoryItem {
    pub snapshot_id: String,
    pub compile_run_id: CompileRunId,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct OverridesResponse {
    pub overrides_json: Value,
    pub pinned_paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// PATCH payload: per-key merge into the overrides map (null deletes),
/// wholesale replacement of pinned paths when present.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OverridesPatch {
    #[serde(default)]
    pub overrides_json: Option<Map<String, Value>>,
    #[serde(default)]
    pub pinned_paths: Option<Vec<String>>,
}

/// Which optional sections `latest` should embed.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeSet {
    pub evidence: bool,
    pub qa: bool,
    pub bundle: bool,
}

impl IncludeSet {
    /// Parse a comma-separated `?include=` value. `full` selects everything;
    /// unknown tokens are a validation error.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut include = Self::default();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token {
                "full" => {
                    include.evidence = true;
                    include.qa = true;
                    include.bundle = true;
                }
                "evidence" => include.evidence = true,
                "qa" => include.qa = true,
                "bundle" => include.bundle = true,
                other => {
                    return Err(CompileError::Validation(format!(
                        "Unknown include token: {other}"
                    )))
                }
            }
        }
        Ok(include)
    }
}

/// The request-time compile service.
#[derive(Clone)]
pub struct CompileService {
    db: BrandBrainDb,
    config: Arc<BrandBrainConfig>,
}

impl CompileService {
    pub fn new(db: BrandBrainDb, config: Arc<BrandBrainConfig>) -> Self {
        Self { db, config }
    }

    pub fn db(&self) -> &BrandBrainDb {
        &self.db
    }

    pub fn config(&self) -> &Arc<BrandBrainConfig> {
        &self.config
    }

    // ========================================================================
    // Kickoff
    // ========================================================================

    pub async fn kickoff(&self, brand_id: &BrandId, force_refresh: bool) -> Result<KickoffOutcome> {
        self.require_brand(brand_id).await?;

        // Gating: tier-0 answers and at least one enabled source. No
        // CompileRun row is created when this fails.
        let mut errors: Vec<GatingError> = Vec::new();
        let onboarding = self.db.get_onboarding(brand_id).await?;
        match &onboarding {
            None => errors.push(GatingError::new(
                gating_codes::ONBOARDING_MISSING,
                "Onboarding has not been started",
            )),
            Some(onboarding) => {
                let missing: Vec<&str> = REQUIRED_TIER0_ANSWERS
                    .iter()
                    .filter(|key| {
                        !onboarding
                            .answers
                            .get(**key)
                            .and_then(Value::as_str)
                            .map(|v| !v.trim().is_empty())
                            .unwrap_or(false)
                    })
                    .copied()
                    .collect();
                if !missing.is_empty() {
                    errors.push(GatingError::new(
                        gating_codes::ONBOARDING_INCOMPLETE,
                        format!("Missing required answers: {}", missing.join(", ")),
                    ));
                }
            }
        }
        let sources = self.db.list_enabled_sources(brand_id).await?;
        if sources.is_empty() {
            errors.push(GatingError::new(
                gating_codes::NO_ENABLED_SOURCES,
                "No enabled source connections",
            ));
        }
        if !errors.is_empty() {
            return Err(CompileError::Gating(errors));
        }

        let now = Utc::now();
        let input_hash = freshness::input_hash_for_brand(&self.db, &self.config, brand_id).await?;

        // Short-circuit: only without force_refresh and with a prior
        // snapshot whose inputs all still hold.
        if !force_refresh {
            if let Some(snapshot) = self.db.latest_snapshot(brand_id).await? {
                let prior = self
                    .db
                    .get_compile_run(&snapshot.compile_run_id, brand_id)
                    .await?;
                if let Some(prior) = prior {
                    let versions_match = prior.prompt_version == self.config.prompt_version
                        && prior.model == self.config.model;
                    if versions_match && prior.input_hash == input_hash {
                        let stale =
                            freshness::any_source_stale(&self.db, &self.config, brand_id, now)
                                .await?;
                        if !stale {
                            info!("Compile short-circuit for brand {}", brand_id);
                            return Ok(KickoffOutcome::Unchanged { snapshot });
                        }
                    }
                }
            }
        }

        let onboarding_snapshot = onboarding.map(|o| o.answers).unwrap_or_else(|| json!({}));
        let run = CompileRun {
            id: CompileRunId::new(),
            brand_id: brand_id.clone(),
            status: CompileStatus::Pending,
            prompt_version: self.config.prompt_version.clone(),
            model: self.config.model.clone(),
            input_hash,
            onboarding_snapshot,
            bundle_id: None,
            evidence_status: None,
            draft: None,
            qa_report: None,
            error: None,
            started_at: None,
            finished_at: None,
            created_at: now,
        };
        self.db.insert_compile_run(&run).await?;
        self.db
            .enqueue_job(
                brand_id,
                &run.id,
                &json!({"force_refresh": force_refresh}),
                3,
                now,
            )
            .await?;

        info!("Enqueued compile run {} for brand {}", run.id, brand_id);
        Ok(KickoffOutcome::Enqueued {
            poll_url: format!(
                "/api/brands/{}/brandbrain/compile/{}/status",
                brand_id, run.id
            ),
            compile_run_id: run.id,
        })
    }

    // ========================================================================
    // Read path
    // ========================================================================

    pub async fn get_status(
        &self,
        brand_id: &BrandId,
        compile_run_id: &CompileRunId,
    ) -> Result<StatusResponse> {
        self.require_brand(brand_id).await?;
        let run = self
            .db
            .get_compile_run(compile_run_id, brand_id)
            .await?
            .ok_or_else(|| {
                CompileError::NotFound(format!("Compile run {compile_run_id} not found"))
            })?;

        let mut response = StatusResponse {
            compile_run_id: run.id.clone(),
            status: run.status,
            evidence_status: None,
            snapshot: None,
            error: None,
        };
        match run.status {
            CompileStatus::Pending | CompileStatus::Running => {}
            CompileStatus::Succeeded => {
                response.evidence_status = run.evidence_status;
                response.snapshot = self
                    .db
                    .get_snapshot_for_run(&run.id)
                    .await?
                    .map(snapshot_ref);
            }
            CompileStatus::Failed => {
                response.evidence_status = run.evidence_status;
                response.error = run.error;
            }
        }
        Ok(response)
    }

    pub async fn latest(&self, brand_id: &BrandId, include: IncludeSet) -> Result<LatestResponse> {
        self.require_brand(brand_id).await?;
        let snapshot = self
            .db
            .latest_snapshot(brand_id)
            .await?
            .ok_or_else(|| CompileError::NotFound(format!("No snapshot for brand {brand_id}")))?;

        let run = self
            .db
            .get_compile_run(&snapshot.compile_run_id, brand_id)
            .await?;

        let mut response = LatestResponse {
            snapshot_id: snapshot.id.to_string(),
            compile_run_id: snapshot.compile_run_id.clone(),
            created_at: brandbrain_db::encode_ts(snapshot.created_at),
            snapshot_json: snapshot.snapshot,
            diff_json: snapshot.diff,
            evidence_status: None,
            qa_report: None,
            bundle_summary: None,
        };
        if let Some(run) = run {
            if include.evidence {
                response.evidence_status = run.evidence_status;
            }
            if include.qa {
                response.qa_report = run.qa_report;
            }
            if include.bundle {
                if let Some(bundle_id) = &run.bundle_id {
                    response.bundle_summary = self
                        .db
                        .get_bundle(bundle_id)
                        .await?
                        .map(|b| serde_json::to_value(b.summary))
                        .transpose()?;
                }
            }
        }
        Ok(response)
    }

    pub async fn history(
        &self,
        brand_id: &BrandId,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryResponse> {
        self.require_brand(brand_id).await?;
        if page == 0 {
            return Err(CompileError::Validation("page starts at 1".to_string()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(CompileError::Validation(format!(
                "page_size must be 1..={MAX_PAGE_SIZE}"
            )));
        }

        let (snapshots, total) = self.db.snapshot_history(brand_id, page, page_size).await?;
        Ok(HistoryResponse {
            page,
            page_size,
            total,
            items: snapshots
                .into_iter()
                .map(|s| HistoryItem {
                    snapshot_id: s.id.to_string(),
                    compile_run_id: s.compile_run_id,
                    created_at: brandbrain_db::encode_ts(s.created_at),
                })
                .collect(),
        })
    }

    // ========================================================================
    // Overrides
    // ========================================================================

    /// Read overrides; an empty document when none exist.
    pub async fn get_overrides(&self, brand_id: &BrandId) -> Result<OverridesResponse> {
        self.require_brand(brand_id).await?;
        Ok(match self.db.get_overrides(brand_id).await? {
            Some(doc) => OverridesResponse {
                overrides_json: doc.overrides,
                pinned_paths: doc.pinned_paths,
                updated_at: Some(brandbrain_db::encode_ts(doc.updated_at)),
            },
            None => OverridesResponse {
                overrides_json: json!({}),
                pinned_paths: Vec::new(),
                updated_at: None,
            },
        })
    }

    /// Merge `overrides_json` per key (null deletes) and replace
    /// `pinned_paths` wholesale when provided.
    pub async fn patch_overrides(
        &self,
        brand_id: &BrandId,
        patch: OverridesPatch,
    ) -> Result<OverridesResponse> {
        self.require_brand(brand_id).await?;

        let existing = self.db.get_overrides(brand_id).await?;
        let (mut overrides, mut pinned) = match existing {
            Some(doc) => (doc.overrides, doc.pinned_paths),
            None => (json!({}), Vec::new()),
        };

        if !overrides.is_object() {
            overrides = json!({});
        }
        if let Some(entries) = patch.overrides_json {
            if let Some(map) = overrides.as_object_mut() {
                for (key, value) in entries {
                    if value.is_null() {
                        map.remove(&key);
                    } else {
                        map.insert(key, value);
                    }
                }
            }
        }
        if let Some(paths) = patch.pinned_paths {
            pinned = paths;
        }

        let now = Utc::now();
        self.db
            .put_overrides(brand_id, &overrides, &pinned, now)
            .await?;
        Ok(OverridesResponse {
            overrides_json: overrides,
            pinned_paths: pinned,
            updated_at: Some(brandbrain_db::encode_ts(now)),
        })
    }

    async fn require_brand(&self, brand_id: &BrandId) -> Result<()> {
        self.db
            .get_brand(brand_id)
            .await?
            .ok_or_else(|| CompileError::NotFound(format!("Brand {brand_id} not found")))?;
        Ok(())
    }
}

fn snapshot_ref(snapshot: Snapshot) -> SnapshotRef {
    SnapshotRef {
        snapshot_id: snapshot.id.to_string(),
        created_at: brandbrain_db::encode_ts(snapshot.created_at),
        snapshot_json: snapshot.snapshot,
    }
}
