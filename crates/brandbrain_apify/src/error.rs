//! Actor client errors.
//!
//! The worker retries on `Transport` and `Timeout` but records them
//! differently: a poll timeout marks the actor run TIMED_OUT, everything
//! else marks it FAILED.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ActorClientError>;

#[derive(Debug, Error)]
pub enum ActorClientError {
    /// The poll wall budget was exceeded before the run reached a terminal
    /// status. Distinct from per-request transport timeouts.
    #[error("Timed out after {elapsed:?} polling run {run_id}")]
    Timeout { run_id: String, elapsed: Duration },

    /// Network-level failure (connect, per-request deadline, TLS). Retriable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-2xx response from the actor API, with status code and body.
    #[error("Actor API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// The API answered 2xx with a body we could not interpret.
    #[error("Invalid actor API response: {0}")]
    Decode(String),
}

impl ActorClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<reqwest::Error> for ActorClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
