//! Ingestion output: actor runs, raw items, evidence items, bundles.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;

use brandbrain_protocol::{
    ActorRunId, ActorRunStatus, BrandId, BundleId, ContentType, EvidenceItemId, Platform,
    SourceConnectionId,
};

use crate::error::{DbError, Result};
use crate::types::{
    ActorRun, EvidenceBundle, EvidenceItem, NewEvidenceItem, RawItem, RawRef, UpsertOutcome,
};
use crate::{decode_ts, decode_ts_opt, encode_ts, BrandBrainDb};

impl BrandBrainDb {
    // ========================================================================
    // Actor runs
    // ========================================================================

    pub async fn insert_actor_run(&self, run: &ActorRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bb_actor_runs
                (id, brand_id, source_connection_id, actor_id, input_json,
                 apify_run_id, apify_dataset_id, status, started_at, finished_at,
                 error_summary, raw_item_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.as_str())
        .bind(run.brand_id.as_str())
        .bind(run.source_connection_id.as_str())
        .bind(&run.actor_id)
        .bind(run.input.to_string())
        .bind(&run.apify_run_id)
        .bind(&run.apify_dataset_id)
        .bind(run.status.as_str())
        .bind(encode_ts(run.started_at))
        .bind(run.finished_at.map(encode_ts))
        .bind(&run.error_summary)
        .bind(run.raw_item_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transition a run to a terminal (or corrected) status.
    pub async fn update_actor_run_status(
        &self,
        id: &ActorRunId,
        status: ActorRunStatus,
        finished_at: Option<DateTime<Utc>>,
        error_summary: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bb_actor_runs SET
                status = ?,
                finished_at = ?,
                error_summary = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(finished_at.map(encode_ts))
        .bind(error_summary)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_actor_run(&self, id: &ActorRunId) -> Result<Option<ActorRun>> {
        let row = sqlx::query("SELECT * FROM bb_actor_runs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_actor_run).transpose()
    }

    /// The most recent SUCCEEDED run for a source, if any. This is the run
    /// the freshness engine ages against.
    pub async fn latest_succeeded_run(
        &self,
        source_connection_id: &SourceConnectionId,
    ) -> Result<Option<ActorRun>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM bb_actor_runs
            WHERE source_connection_id = ? AND status = 'SUCCEEDED'
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(source_connection_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_actor_run).transpose()
    }

    // ========================================================================
    // Raw items
    // ========================================================================

    /// Atomically replace the raw items of a run: delete whatever is there,
    /// bulk-insert the new payloads with sequential indexes, and refresh the
    /// run's count. Re-running with the same payloads is a fixed point.
    pub async fn replace_raw_items(
        &self,
        actor_run_id: &ActorRunId,
        payloads: &[Value],
    ) -> Result<u32> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM bb_raw_items WHERE actor_run_id = ?")
            .bind(actor_run_id.as_str())
            .execute(&mut *tx)
            .await?;

        for (index, payload) in payloads.iter().enumerate() {
            sqlx::query(
                "INSERT INTO bb_raw_items (actor_run_id, item_index, payload_json) VALUES (?, ?, ?)",
            )
            .bind(actor_run_id.as_str())
            .bind(index as i64)
            .bind(payload.to_string())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE bb_actor_runs SET raw_item_count = ? WHERE id = ?")
            .bind(payloads.len() as i64)
            .bind(actor_run_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(payloads.len() as u32)
    }

    /// Raw items of a run in ascending index order, capped at `limit`.
    pub async fn list_raw_items(
        &self,
        actor_run_id: &ActorRunId,
        limit: u32,
    ) -> Result<Vec<RawItem>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM bb_raw_items
            WHERE actor_run_id = ?
            ORDER BY item_index ASC
            LIMIT ?
            "#,
        )
        .bind(actor_run_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RawItem {
                    id: row.get("id"),
                    actor_run_id: actor_run_id.clone(),
                    item_index: row.get("item_index"),
                    payload: serde_json::from_str(row.get::<String, _>("payload_json").as_str())?,
                })
            })
            .collect()
    }

    // ========================================================================
    // Evidence items
    // ========================================================================

    /// Upsert a normalized item by its dedupe key.
    ///
    /// Non-web items key on (brand, platform, content_type, external_id) and
    /// must carry an external id; web items key on canonical_url. On update
    /// the mutable fields are overwritten, the raw-ref is merged in if not
    /// present, and `created_at` is preserved.
    pub async fn upsert_evidence_item(
        &self,
        brand_id: &BrandId,
        item: &NewEvidenceItem,
        raw_ref: RawRef,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        if item.platform != Platform::Web && item.external_id.is_none() {
            return Err(DbError::constraint(format!(
                "Non-web evidence item without external_id: {} {}",
                item.platform, item.canonical_url
            )));
        }

        let mut tx = self.pool.begin().await?;

        let existing = if item.platform == Platform::Web {
            sqlx::query(
                r#"
                SELECT id, raw_refs_json FROM bb_evidence_items
                WHERE brand_id = ? AND platform = ? AND content_type = ? AND canonical_url = ?
                "#,
            )
            .bind(brand_id.as_str())
            .bind(item.platform.as_str())
            .bind(item.content_type.as_str())
            .bind(&item.canonical_url)
            .fetch_optional(&mut *tx)
            .await?
        } else {
            sqlx::query(
                r#"
                SELECT id, raw_refs_json FROM bb_evidence_items
                WHERE brand_id = ? AND platform = ? AND content_type = ? AND external_id = ?
                "#,
            )
            .bind(brand_id.as_str())
            .bind(item.platform.as_str())
            .bind(item.content_type.as_str())
            .bind(item.external_id.as_deref())
            .fetch_optional(&mut *tx)
            .await?
        };

        let outcome = match existing {
            Some(row) => {
                let id: String = row.get("id");
                let mut raw_refs: Vec<RawRef> =
                    serde_json::from_str(row.get::<String, _>("raw_refs_json").as_str())?;
                if !raw_refs.contains(&raw_ref) {
                    raw_refs.push(raw_ref);
                }

                sqlx::query(
                    r#"
                    UPDATE bb_evidence_items SET
                        external_id = ?,
                        canonical_url = ?,
                        published_at = ?,
                        metrics_json = ?,
                        text_snippet = ?,
                        flags_json = ?,
                        raw_refs_json = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(item.external_id.as_deref())
                .bind(&item.canonical_url)
                .bind(item.published_at.map(encode_ts))
                .bind(item.metrics.to_string())
                .bind(&item.text_snippet)
                .bind(item.flags.to_string())
                .bind(serde_json::to_string(&raw_refs)?)
                .bind(encode_ts(now))
                .bind(&id)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Updated
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO bb_evidence_items
                        (id, brand_id, platform, content_type, external_id, canonical_url,
                         published_at, metrics_json, text_snippet, flags_json, raw_refs_json,
                         created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(EvidenceItemId::new().as_str())
                .bind(brand_id.as_str())
                .bind(item.platform.as_str())
                .bind(item.content_type.as_str())
                .bind(item.external_id.as_deref())
                .bind(&item.canonical_url)
                .bind(item.published_at.map(encode_ts))
                .bind(item.metrics.to_string())
                .bind(&item.text_snippet)
                .bind(item.flags.to_string())
                .bind(serde_json::to_string(&vec![raw_ref])?)
                .bind(encode_ts(now))
                .bind(encode_ts(now))
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Created
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Distinct (platform, content_type) pairs among a brand's candidates,
    /// in stable order.
    pub async fn candidate_pairs(
        &self,
        brand_id: &BrandId,
        platforms: &[Platform],
    ) -> Result<Vec<(Platform, ContentType)>> {
        if platforms.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT DISTINCT platform, content_type FROM bb_evidence_items
            WHERE brand_id = ? AND platform IN ({})
            ORDER BY platform ASC, content_type ASC
            "#,
            placeholders(platforms.len())
        );
        let mut query = sqlx::query(&sql).bind(brand_id.as_str());
        for platform in platforms {
            query = query.bind(platform.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let platform_str: String = row.get("platform");
                let content_str: String = row.get("content_type");
                let platform = Platform::parse(&platform_str).ok_or_else(|| {
                    DbError::invalid_state(format!("Unknown platform: {platform_str}"))
                })?;
                let content_type = ContentType::parse(&content_str).ok_or_else(|| {
                    DbError::invalid_state(format!("Unknown content type: {content_str}"))
                })?;
                Ok((platform, content_type))
            })
            .collect()
    }

    /// Whether the candidate set contains any non-web item. Derived from the
    /// same candidate filter as `candidate_pairs` so future filters flow
    /// into both.
    pub async fn candidates_have_non_web(
        &self,
        brand_id: &BrandId,
        platforms: &[Platform],
    ) -> Result<bool> {
        let non_web: Vec<&Platform> = platforms.iter().filter(|p| **p != Platform::Web).collect();
        if non_web.is_empty() {
            return Ok(false);
        }
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM bb_evidence_items WHERE brand_id = ? AND platform IN ({}))",
            placeholders(non_web.len())
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(brand_id.as_str());
        for platform in non_web {
            query = query.bind(platform.as_str());
        }
        Ok(query.fetch_one(&self.pool).await? != 0)
    }

    /// Eligible candidates of one pair, most recent first
    /// (`published_at DESC NULLS LAST, canonical_url ASC`), capped.
    pub async fn pair_recent(
        &self,
        brand_id: &BrandId,
        platform: Platform,
        content_type: ContentType,
        exclude_collection_pages: bool,
        limit: u32,
    ) -> Result<Vec<EvidenceItem>> {
        let sql = format!(
            r#"
            SELECT * FROM bb_evidence_items
            WHERE brand_id = ? AND platform = ? AND content_type = ?{}
            ORDER BY published_at IS NULL ASC, published_at DESC, canonical_url ASC
            LIMIT ?
            "#,
            collection_page_clause(exclude_collection_pages)
        );
        let rows = sqlx::query(&sql)
            .bind(brand_id.as_str())
            .bind(platform.as_str())
            .bind(content_type.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_evidence_item).collect()
    }

    /// The bounded "remaining to score" slice of one pair: candidates not in
    /// `exclude_ids`, preordered by a SQL engagement proxy so the exact
    /// in-memory scoring never loads a pathological source wholesale.
    pub async fn pair_engagement_slice(
        &self,
        brand_id: &BrandId,
        platform: Platform,
        content_type: ContentType,
        exclude_collection_pages: bool,
        exclude_ids: &[EvidenceItemId],
        limit: u32,
    ) -> Result<Vec<EvidenceItem>> {
        let not_in = if exclude_ids.is_empty() {
            String::new()
        } else {
            format!(" AND id NOT IN ({})", placeholders(exclude_ids.len()))
        };
        let sql = format!(
            r#"
            SELECT * FROM bb_evidence_items
            WHERE brand_id = ? AND platform = ? AND content_type = ?{}{}
            ORDER BY
                COALESCE(json_extract(metrics_json, '$.likes'), 0)
                + COALESCE(json_extract(metrics_json, '$.reactions'), 0)
                + 2 * COALESCE(json_extract(metrics_json, '$.comments'), 0)
                + 3 * COALESCE(json_extract(metrics_json, '$.shares'), 0)
                + COALESCE(json_extract(metrics_json, '$.views'), 0) / 100.0
                DESC,
                published_at IS NULL ASC, published_at DESC, canonical_url ASC
            LIMIT ?
            "#,
            collection_page_clause(exclude_collection_pages),
            not_in
        );
        let mut query = sqlx::query(&sql)
            .bind(brand_id.as_str())
            .bind(platform.as_str())
            .bind(content_type.as_str());
        for id in exclude_ids {
            query = query.bind(id.as_str());
        }
        let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_evidence_item).collect()
    }

    /// Count of eligible candidates for one pair (summary reporting).
    pub async fn count_pair_eligible(
        &self,
        brand_id: &BrandId,
        platform: Platform,
        content_type: ContentType,
        exclude_collection_pages: bool,
    ) -> Result<u32> {
        let sql = format!(
            "SELECT COUNT(*) FROM bb_evidence_items WHERE brand_id = ? AND platform = ? AND content_type = ?{}",
            collection_page_clause(exclude_collection_pages)
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(brand_id.as_str())
            .bind(platform.as_str())
            .bind(content_type.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u32)
    }

    /// How many web items of a pair are collection pages (summary reporting).
    pub async fn count_pair_collection_pages(
        &self,
        brand_id: &BrandId,
        platform: Platform,
        content_type: ContentType,
    ) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM bb_evidence_items
            WHERE brand_id = ? AND platform = ? AND content_type = ?
              AND json_extract(flags_json, '$.is_collection_page') = 1
            "#,
        )
        .bind(brand_id.as_str())
        .bind(platform.as_str())
        .bind(content_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u32)
    }

    // ========================================================================
    // Bundles
    // ========================================================================

    pub async fn insert_bundle(&self, bundle: &EvidenceBundle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bb_evidence_bundles (id, brand_id, criteria_json, item_ids_json, summary_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(bundle.id.as_str())
        .bind(bundle.brand_id.as_str())
        .bind(serde_json::to_string(&bundle.criteria)?)
        .bind(serde_json::to_string(&bundle.item_ids)?)
        .bind(serde_json::to_string(&bundle.summary)?)
        .bind(encode_ts(bundle.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_bundle(&self, id: &BundleId) -> Result<Option<EvidenceBundle>> {
        let row = sqlx::query("SELECT * FROM bb_evidence_bundles WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(EvidenceBundle {
                id: id.clone(),
                brand_id: BrandId::parse(row.get::<String, _>("brand_id").as_str())
                    .map_err(|e| DbError::invalid_state(e.to_string()))?,
                criteria: serde_json::from_str(row.get::<String, _>("criteria_json").as_str())?,
                item_ids: serde_json::from_str(row.get::<String, _>("item_ids_json").as_str())?,
                summary: serde_json::from_str(row.get::<String, _>("summary_json").as_str())?,
                created_at: decode_ts(row.get::<String, _>("created_at").as_str())?,
            })
        })
        .transpose()
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// WHERE fragment excluding flagged collection pages. Applied only when the
/// caller decided the exclusion applies (web pair, exception not in effect).
fn collection_page_clause(exclude: bool) -> &'static str {
    if exclude {
        " AND COALESCE(json_extract(flags_json, '$.is_collection_page'), 0) = 0"
    } else {
        ""
    }
}

fn row_to_actor_run(row: &sqlx::sqlite::SqliteRow) -> Result<ActorRun> {
    let status_str: String = row.get("status");
    let status = ActorRunStatus::parse(&status_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown actor run status: {status_str}")))?;

    Ok(ActorRun {
        id: ActorRunId::parse(row.get::<String, _>("id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        brand_id: BrandId::parse(row.get::<String, _>("brand_id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        source_connection_id: SourceConnectionId::parse(
            row.get::<String, _>("source_connection_id").as_str(),
        )
        .map_err(|e| DbError::invalid_state(e.to_string()))?,
        actor_id: row.get("actor_id"),
        input: serde_json::from_str(row.get::<String, _>("input_json").as_str())?,
        apify_run_id: row.get("apify_run_id"),
        apify_dataset_id: row.get("apify_dataset_id"),
        status,
        started_at: decode_ts(row.get::<String, _>("started_at").as_str())?,
        finished_at: decode_ts_opt(row.get("finished_at"))?,
        error_summary: row.get("error_summary"),
        raw_item_count: row.get("raw_item_count"),
    })
}

fn row_to_evidence_item(row: &sqlx::sqlite::SqliteRow) -> Result<EvidenceItem> {
    let platform_str: String = row.get("platform");
    let platform = Platform::parse(&platform_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown platform: {platform_str}")))?;
    let content_str: String = row.get("content_type");
    let content_type = ContentType::parse(&content_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown content type: {content_str}")))?;

    Ok(EvidenceItem {
        id: EvidenceItemId::parse(row.get::<String, _>("id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        brand_id: BrandId::parse(row.get::<String, _>("brand_id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        platform,
        content_type,
        external_id: row.get("external_id"),
        canonical_url: row.get("canonical_url"),
        published_at: decode_ts_opt(row.get("published_at"))?,
        metrics: serde_json::from_str(row.get::<String, _>("metrics_json").as_str())?,
        text_snippet: row.get("text_snippet"),
        flags: serde_json::from_str(row.get::<String, _>("flags_json").as_str())?,
        raw_refs: serde_json::from_str(row.get::<String, _>("raw_refs_json").as_str())?,
        created_at: decode_ts(row.get::<String, _>("created_at").as_str())?,
        updated_at: decode_ts(row.get::<String, _>("updated_at").as_str())?,
    })
}
