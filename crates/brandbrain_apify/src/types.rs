//! Wire types for the Apify v2 API.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use brandbrain_protocol::ActorRunStatus;

/// Snapshot of a run as reported by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo {
    pub run_id: String,
    pub dataset_id: String,
    pub status: ActorRunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunInfo {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Apify wraps every response in `{"data": …}`.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RunDto {
    pub id: String,
    pub default_dataset_id: String,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunDto {
    pub fn into_run_info(self) -> RunInfo {
        RunInfo {
            run_id: self.id,
            dataset_id: self.default_dataset_id,
            status: map_wire_status(&self.status),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Map a provider status string onto our closed status set.
///
/// Terminal statuses are exactly SUCCEEDED / FAILED / TIMED-OUT / ABORTED;
/// everything else (READY, RUNNING, TIMING-OUT, ABORTING, unknown) counts
/// as still running.
pub(crate) fn map_wire_status(raw: &str) -> ActorRunStatus {
    match raw.to_uppercase().as_str() {
        "SUCCEEDED" => ActorRunStatus::Succeeded,
        "FAILED" => ActorRunStatus::Failed,
        "TIMED-OUT" | "TIMED_OUT" => ActorRunStatus::TimedOut,
        "ABORTED" => ActorRunStatus::Aborted,
        _ => ActorRunStatus::Running,
    }
}
