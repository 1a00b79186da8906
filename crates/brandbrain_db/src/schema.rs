//! Database schema creation for all BrandBrain tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::Result;
use crate::BrandBrainDb;
use tracing::info;

impl BrandBrainDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        // WAL mode for better concurrent access
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        self.create_brand_tables().await?;
        self.create_evidence_tables().await?;
        self.create_compile_tables().await?;
        self.create_job_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    /// Brand-scoped configuration tables (written by the read/write API).
    async fn create_brand_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS bb_brands (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                name TEXT NOT NULL,
                slug TEXT NOT NULL,
                deleted_at TEXT,
                UNIQUE(org_id, slug)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS bb_onboarding (
                brand_id TEXT PRIMARY KEY REFERENCES bb_brands(id),
                tier INTEGER NOT NULL DEFAULT 0,
                answers_json TEXT NOT NULL DEFAULT '{}',
                updated_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS bb_source_connections (
                id TEXT PRIMARY KEY,
                brand_id TEXT NOT NULL REFERENCES bb_brands(id),
                platform TEXT NOT NULL,
                capability TEXT NOT NULL,
                identifier TEXT NOT NULL,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                settings_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(brand_id, platform, capability, identifier)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS bb_overrides (
                brand_id TEXT PRIMARY KEY REFERENCES bb_brands(id),
                overrides_json TEXT NOT NULL DEFAULT '{}',
                pinned_paths_json TEXT NOT NULL DEFAULT '[]',
                updated_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sources_brand ON bb_source_connections(brand_id, is_enabled)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Ingestion output tables: actor runs, raw items, evidence, bundles.
    async fn create_evidence_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS bb_actor_runs (
                id TEXT PRIMARY KEY,
                brand_id TEXT NOT NULL REFERENCES bb_brands(id),
                source_connection_id TEXT NOT NULL REFERENCES bb_source_connections(id),
                actor_id TEXT NOT NULL,
                input_json TEXT NOT NULL DEFAULT '{}',
                apify_run_id TEXT,
                apify_dataset_id TEXT,
                status TEXT NOT NULL DEFAULT 'RUNNING',
                started_at TEXT NOT NULL,
                finished_at TEXT,
                error_summary TEXT,
                raw_item_count INTEGER NOT NULL DEFAULT 0
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Raw items are owned by their run: replace-and-delete is scoped to
        // one actor_run_id and cascades away with it.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS bb_raw_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor_run_id TEXT NOT NULL REFERENCES bb_actor_runs(id) ON DELETE CASCADE,
                item_index INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                UNIQUE(actor_run_id, item_index)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS bb_evidence_items (
                id TEXT PRIMARY KEY,
                brand_id TEXT NOT NULL REFERENCES bb_brands(id),
                platform TEXT NOT NULL,
                content_type TEXT NOT NULL,
                external_id TEXT,
                canonical_url TEXT NOT NULL,
                published_at TEXT,
                metrics_json TEXT NOT NULL DEFAULT '{}',
                text_snippet TEXT NOT NULL DEFAULT '',
                flags_json TEXT NOT NULL DEFAULT '{}',
                raw_refs_json TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Dedupe keys: non-web items key on external_id, web items on
        // canonical_url. Partial indexes keep the two spaces disjoint.
        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_evidence_nonweb_key
               ON bb_evidence_items(brand_id, platform, content_type, external_id)
               WHERE external_id IS NOT NULL"#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_evidence_web_key
               ON bb_evidence_items(brand_id, platform, content_type, canonical_url)
               WHERE platform = 'web'"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS bb_evidence_bundles (
                id TEXT PRIMARY KEY,
                brand_id TEXT NOT NULL REFERENCES bb_brands(id),
                criteria_json TEXT NOT NULL,
                item_ids_json TEXT NOT NULL,
                summary_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_actor_runs_source ON bb_actor_runs(source_connection_id, status, started_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_evidence_brand_pair ON bb_evidence_items(brand_id, platform, content_type)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_raw_items_run ON bb_raw_items(actor_run_id, item_index)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Compile runs and snapshots.
    async fn create_compile_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS bb_compile_runs (
                id TEXT PRIMARY KEY,
                brand_id TEXT NOT NULL REFERENCES bb_brands(id),
                status TEXT NOT NULL DEFAULT 'PENDING',
                prompt_version TEXT NOT NULL,
                model TEXT NOT NULL,
                input_hash TEXT NOT NULL,
                onboarding_json TEXT NOT NULL DEFAULT '{}',
                bundle_id TEXT REFERENCES bb_evidence_bundles(id),
                evidence_status_json TEXT,
                draft_json TEXT,
                qa_report_json TEXT,
                error TEXT,
                started_at TEXT,
                finished_at TEXT,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Snapshot references CompileRun; never the other way around, so
        // writes stay topologically ordered.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS bb_snapshots (
                id TEXT PRIMARY KEY,
                brand_id TEXT NOT NULL REFERENCES bb_brands(id),
                compile_run_id TEXT NOT NULL REFERENCES bb_compile_runs(id),
                snapshot_json TEXT NOT NULL,
                diff_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_compile_runs_brand ON bb_compile_runs(brand_id, created_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_brand ON bb_snapshots(brand_id, created_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_run ON bb_snapshots(compile_run_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The durable job queue.
    async fn create_job_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS bb_jobs (
                id TEXT PRIMARY KEY,
                brand_id TEXT NOT NULL REFERENCES bb_brands(id),
                compile_run_id TEXT NOT NULL REFERENCES bb_compile_runs(id),
                job_type TEXT NOT NULL DEFAULT 'compile',
                status TEXT NOT NULL DEFAULT 'PENDING',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                locked_at TEXT,
                locked_by TEXT,
                available_at TEXT NOT NULL,
                params_json TEXT NOT NULL DEFAULT '{}',
                last_error TEXT,
                created_at TEXT NOT NULL,
                finished_at TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_claimable ON bb_jobs(status, available_at, created_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_locked ON bb_jobs(status, locked_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
