//! Shared vocabulary for the BrandBrain compile orchestrator.
//!
//! Everything that crosses a crate boundary lives here: identifier
//! wrappers, platform/capability enums, status enums, the evidence-status
//! document, bundle criteria and summary, the canonical input hash, and
//! runtime configuration. All interfaces (API, worker, DB layer) use these
//! types.

pub mod config;
pub mod error;
pub mod hash;
pub mod ids;
pub mod types;

pub use config::BrandBrainConfig;
pub use error::{GatingError, gating_codes};
pub use hash::{canonical_json, compute_input_hash, hash_parts, SourceProjection};
pub use ids::{
    ActorRunId, BrandId, BundleId, CompileRunId, EvidenceItemId, IdParseError, JobId, SnapshotId,
    SourceConnectionId,
};
pub use types::{
    content_type_for, source_label, ActorRunStatus, BundleCriteria, BundleSummary, Capability,
    CompileStatus, ContentType, EvidenceStatus, FailedSource, JobStatus, JobType, PairSummary,
    Platform, RefreshedSource, ReusedSource, SkippedSource, TranscriptCoverage,
};
