//! Entity structs mirroring the BrandBrain tables.
//!
//! These types are the single source of truth for rows crossing the DB
//! boundary. JSON columns are surfaced as `serde_json::Value`; statuses use
//! the shared enums from `brandbrain_protocol`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use brandbrain_protocol::{
    ActorRunId, ActorRunStatus, BrandId, BundleCriteria, BundleId, BundleSummary, Capability,
    CompileRunId, CompileStatus, ContentType, EvidenceItemId, EvidenceStatus, JobId, JobStatus,
    JobType, Platform, SnapshotId, SourceConnectionId,
};

/// Tenant scope root.
#[derive(Debug, Clone)]
pub struct Brand {
    pub id: BrandId,
    pub org_id: String,
    pub name: String,
    pub slug: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One onboarding row per brand; tier-0 answers gate compilation.
#[derive(Debug, Clone)]
pub struct Onboarding {
    pub brand_id: BrandId,
    pub tier: i32,
    pub answers: Value,
    pub updated_at: DateTime<Utc>,
}

/// An external content source enabled for a brand.
#[derive(Debug, Clone)]
pub struct SourceConnection {
    pub id: SourceConnectionId,
    pub brand_id: BrandId,
    pub platform: Platform,
    pub capability: Capability,
    pub identifier: String,
    pub is_enabled: bool,
    pub settings: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-brand overrides overlaying the compiled snapshot.
#[derive(Debug, Clone)]
pub struct OverridesDoc {
    pub brand_id: BrandId,
    pub overrides: Value,
    pub pinned_paths: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// One attempt to call the upstream actor.
#[derive(Debug, Clone)]
pub struct ActorRun {
    pub id: ActorRunId,
    pub brand_id: BrandId,
    pub source_connection_id: SourceConnectionId,
    pub actor_id: String,
    pub input: Value,
    pub apify_run_id: Option<String>,
    pub apify_dataset_id: Option<String>,
    pub status: ActorRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_summary: Option<String>,
    pub raw_item_count: i64,
}

/// One item fetched from an actor dataset.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub id: i64,
    pub actor_run_id: ActorRunId,
    pub item_index: i64,
    pub payload: Value,
}

/// Back-pointer from an evidence item to the raw item it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRef {
    pub actor_run_id: String,
    pub item_index: i64,
}

/// Canonical evidence item (NEI).
#[derive(Debug, Clone)]
pub struct EvidenceItem {
    pub id: EvidenceItemId,
    pub brand_id: BrandId,
    pub platform: Platform,
    pub content_type: ContentType,
    pub external_id: Option<String>,
    pub canonical_url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub metrics: Value,
    pub text_snippet: String,
    pub flags: Value,
    pub raw_refs: Vec<RawRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EvidenceItem {
    /// Read a named metric, treating absent or non-numeric values as zero.
    pub fn metric(&self, key: &str) -> f64 {
        self.metrics
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    /// Read a named boolean flag, absent means false.
    pub fn flag(&self, key: &str) -> bool {
        self.flags.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Adapter output: the mutable projection of an evidence item. The upsert
/// resolves it against the dedupe key and merges raw-refs.
#[derive(Debug, Clone)]
pub struct NewEvidenceItem {
    pub platform: Platform,
    pub content_type: ContentType,
    pub external_id: Option<String>,
    pub canonical_url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub metrics: Value,
    pub text_snippet: String,
    pub flags: Value,
}

/// Whether an upsert inserted a fresh row or merged into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// A materialized, immutable evidence selection.
#[derive(Debug, Clone)]
pub struct EvidenceBundle {
    pub id: BundleId,
    pub brand_id: BrandId,
    pub criteria: BundleCriteria,
    pub item_ids: Vec<EvidenceItemId>,
    pub summary: BundleSummary,
    pub created_at: DateTime<Utc>,
}

/// A single attempt to compile a snapshot.
#[derive(Debug, Clone)]
pub struct CompileRun {
    pub id: CompileRunId,
    pub brand_id: BrandId,
    pub status: CompileStatus,
    pub prompt_version: String,
    pub model: String,
    pub input_hash: String,
    pub onboarding_snapshot: Value,
    pub bundle_id: Option<BundleId>,
    pub evidence_status: Option<EvidenceStatus>,
    pub draft: Option<Value>,
    pub qa_report: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Durable, immutable output of a successful compile.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub brand_id: BrandId,
    pub compile_run_id: CompileRunId,
    pub snapshot: Value,
    pub diff: Value,
    pub created_at: DateTime<Utc>,
}

/// A unit of work for a worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub brand_id: BrandId,
    pub compile_run_id: CompileRunId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub available_at: DateTime<Utc>,
    pub params: Value,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// `force_refresh` flag carried in the job params.
    pub fn force_refresh(&self) -> bool {
        self.params
            .get("force_refresh")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
