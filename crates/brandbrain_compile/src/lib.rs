//! The BrandBrain compile pipeline.
//!
//! A compile request flows gating → short-circuit → ingest → normalize →
//! bundle → snapshot. The orchestrator owns the request-time half (gating,
//! short-circuit, enqueue, read path); the worker owns the job-time half
//! (source iteration under a heartbeat, bundling, snapshot write).

pub mod bundle;
pub mod draft;
pub mod error;
pub mod freshness;
pub mod ingest;
pub mod normalize;
pub mod orchestrator;
pub mod worker;

pub use bundle::Bundler;
pub use draft::{DraftProducer, StubDraftProducer};
pub use error::CompileError;
pub use freshness::Freshness;
pub use ingest::{IngestionResult, Ingestor};
pub use orchestrator::{CompileService, IncludeSet, KickoffOutcome, OverridesPatch};
pub use worker::{CompileWorker, PollOutcome};
