//! Persistence layer for the BrandBrain compile orchestrator.
//!
//! One `BrandBrainDb` wraps a SQLite pool; query methods are spread across
//! per-domain modules (`tenants`, `evidence`, `compile`, `queue`) as
//! `impl BrandBrainDb` blocks. All CREATE TABLE statements live in
//! `schema.rs`.
//!
//! Timestamps are stored as fixed-width RFC-3339 UTC strings with
//! millisecond precision so lexicographic SQL comparison is chronological
//! comparison. Use [`encode_ts`]/[`decode_ts`] at every boundary.

pub mod compile;
pub mod error;
pub mod evidence;
pub mod queue;
mod schema;
pub mod tenants;
pub mod types;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

pub use error::{DbError, Result};
pub use queue::{BackoffPolicy, StaleRelease};
pub use tenants::normalize_identifier;
pub use types::*;

/// Handle to the BrandBrain database.
#[derive(Clone)]
pub struct BrandBrainDb {
    pub(crate) pool: SqlitePool,
}

impl BrandBrainDb {
    /// Open (or create) a database at the given URL and ensure the schema.
    pub async fn open(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        info!("Connected to database: {}", url);
        Ok(db)
    }

    /// Open an in-memory database (tests).
    ///
    /// A single connection keeps every query on the same in-memory store.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// The underlying pool, for callers that need raw queries (tests).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Encode a timestamp as a fixed-width RFC-3339 UTC millis string.
pub fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decode a timestamp written by [`encode_ts`].
pub fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DbError::invalid_state(format!("Bad timestamp {raw:?}: {e}")))
}

/// Decode an optional timestamp column.
pub fn decode_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(decode_ts).transpose()
}
