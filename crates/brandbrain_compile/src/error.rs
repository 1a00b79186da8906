//! Compile-layer errors: the closed taxonomy the API boundary maps onto
//! fixed status codes and the worker maps onto retry decisions.

use thiserror::Error;

use brandbrain_apify::ActorClientError;
use brandbrain_db::DbError;
use brandbrain_protocol::GatingError;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    /// Malformed identifier or request payload. API: 400.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Gating failed; carries the structured per-error list. API: 422.
    #[error("Gating failed ({} errors)", .0.len())]
    Gating(Vec<GatingError>),

    /// Missing tenant, run, or snapshot — including runs owned by another
    /// tenant. API: 404.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attempted double-completion or similar state conflict.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Retriable upstream failure (actor API 5xx, transport).
    #[error("Transient error: {0}")]
    Transient(String),

    /// Actor polling exceeded its wall budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// No normalization adapter for an actor id (or it is feature-gated).
    #[error("Adapter missing: {0}")]
    AdapterMissing(String),

    /// Job exhausted its attempts.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// Database failure below us.
    #[error(transparent)]
    Db(DbError),

    /// Serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything unexpected. API: 500, single-line sanitized message.
    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl From<DbError> for CompileError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Db(other),
        }
    }
}

impl From<ActorClientError> for CompileError {
    fn from(err: ActorClientError) -> Self {
        match err {
            ActorClientError::Timeout { .. } => Self::Timeout(err.to_string()),
            other => Self::Transient(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_db_not_found_becomes_not_found() {
        let err: CompileError = DbError::not_found("brand x").into();
        assert!(matches!(err, CompileError::NotFound(_)));
    }

    #[test]
    fn test_actor_timeout_is_distinct_from_transport() {
        let timeout: CompileError = ActorClientError::Timeout {
            run_id: "r".to_string(),
            elapsed: Duration::from_secs(600),
        }
        .into();
        assert!(matches!(timeout, CompileError::Timeout(_)));

        let transport: CompileError =
            ActorClientError::Transport("connection reset".to_string()).into();
        assert!(matches!(transport, CompileError::Transient(_)));
    }
}
