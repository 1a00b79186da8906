//! Brand-scoped configuration: brands, onboarding, sources, overrides.
//!
//! These rows are created and mutated by the read/write API; the compile
//! core reads them, and the overrides PATCH path writes back through
//! `put_overrides`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;

use brandbrain_protocol::{BrandId, Capability, Platform, SourceConnectionId};

use crate::error::{DbError, Result};
use crate::types::{Brand, Onboarding, OverridesDoc, SourceConnection};
use crate::{decode_ts, decode_ts_opt, encode_ts, BrandBrainDb};

impl BrandBrainDb {
    // ========================================================================
    // Brands
    // ========================================================================

    /// Insert a brand row.
    pub async fn create_brand(&self, brand: &Brand) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bb_brands (id, org_id, name, slug, deleted_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(brand.id.as_str())
        .bind(&brand.org_id)
        .bind(&brand.name)
        .bind(&brand.slug)
        .bind(brand.deleted_at.map(encode_ts))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a live (not soft-deleted) brand.
    pub async fn get_brand(&self, brand_id: &BrandId) -> Result<Option<Brand>> {
        let row = sqlx::query("SELECT * FROM bb_brands WHERE id = ? AND deleted_at IS NULL")
            .bind(brand_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(Brand {
                id: BrandId::parse(row.get::<String, _>("id").as_str())
                    .map_err(|e| DbError::invalid_state(e.to_string()))?,
                org_id: row.get("org_id"),
                name: row.get("name"),
                slug: row.get("slug"),
                deleted_at: decode_ts_opt(row.get("deleted_at"))?,
            })
        })
        .transpose()
    }

    // ========================================================================
    // Onboarding
    // ========================================================================

    /// Upsert the single onboarding row for a brand.
    pub async fn upsert_onboarding(
        &self,
        brand_id: &BrandId,
        tier: i32,
        answers: &Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bb_onboarding (brand_id, tier, answers_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(brand_id) DO UPDATE SET
                tier = excluded.tier,
                answers_json = excluded.answers_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(brand_id.as_str())
        .bind(tier)
        .bind(answers.to_string())
        .bind(encode_ts(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_onboarding(&self, brand_id: &BrandId) -> Result<Option<Onboarding>> {
        let row = sqlx::query("SELECT * FROM bb_onboarding WHERE brand_id = ?")
            .bind(brand_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(Onboarding {
                brand_id: brand_id.clone(),
                tier: row.get("tier"),
                answers: serde_json::from_str(row.get::<String, _>("answers_json").as_str())?,
                updated_at: decode_ts(row.get::<String, _>("updated_at").as_str())?,
            })
        })
        .transpose()
    }

    // ========================================================================
    // Source connections
    // ========================================================================

    /// Upsert by the natural key (brand, platform, capability, identifier).
    /// The identifier is normalized before it reaches the unique index.
    pub async fn upsert_source_connection(&self, sc: &SourceConnection) -> Result<()> {
        let identifier = normalize_identifier(sc.platform, &sc.identifier);
        sqlx::query(
            r#"
            INSERT INTO bb_source_connections
                (id, brand_id, platform, capability, identifier, is_enabled, settings_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(brand_id, platform, capability, identifier) DO UPDATE SET
                is_enabled = excluded.is_enabled,
                settings_json = excluded.settings_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(sc.id.as_str())
        .bind(sc.brand_id.as_str())
        .bind(sc.platform.as_str())
        .bind(sc.capability.as_str())
        .bind(&identifier)
        .bind(sc.is_enabled)
        .bind(sc.settings.to_string())
        .bind(encode_ts(sc.created_at))
        .bind(encode_ts(sc.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Enabled sources in the stable processing order:
    /// (platform, capability, identifier).
    pub async fn list_enabled_sources(&self, brand_id: &BrandId) -> Result<Vec<SourceConnection>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM bb_source_connections
            WHERE brand_id = ? AND is_enabled = 1
            ORDER BY platform ASC, capability ASC, identifier ASC
            "#,
        )
        .bind(brand_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_source_connection).collect()
    }

    pub async fn get_source_connection(
        &self,
        id: &SourceConnectionId,
    ) -> Result<Option<SourceConnection>> {
        let row = sqlx::query("SELECT * FROM bb_source_connections WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_source_connection).transpose()
    }

    // ========================================================================
    // Overrides
    // ========================================================================

    pub async fn get_overrides(&self, brand_id: &BrandId) -> Result<Option<OverridesDoc>> {
        let row = sqlx::query("SELECT * FROM bb_overrides WHERE brand_id = ?")
            .bind(brand_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(OverridesDoc {
                brand_id: brand_id.clone(),
                overrides: serde_json::from_str(row.get::<String, _>("overrides_json").as_str())?,
                pinned_paths: serde_json::from_str(
                    row.get::<String, _>("pinned_paths_json").as_str(),
                )?,
                updated_at: decode_ts(row.get::<String, _>("updated_at").as_str())?,
            })
        })
        .transpose()
    }

    /// Store the merged overrides document. The merge itself happens in the
    /// orchestrator; this writes whatever it resolved to.
    pub async fn put_overrides(
        &self,
        brand_id: &BrandId,
        overrides: &Value,
        pinned_paths: &[String],
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bb_overrides (brand_id, overrides_json, pinned_paths_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(brand_id) DO UPDATE SET
                overrides_json = excluded.overrides_json,
                pinned_paths_json = excluded.pinned_paths_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(brand_id.as_str())
        .bind(overrides.to_string())
        .bind(serde_json::to_string(pinned_paths)?)
        .bind(encode_ts(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Normalize a source identifier on write: handles are trimmed, lowercased,
/// and stripped of a leading `@`; URLs lose a trailing slash.
pub fn normalize_identifier(platform: Platform, identifier: &str) -> String {
    let trimmed = identifier.trim();
    match platform {
        Platform::Web => trimmed.trim_end_matches('/').to_string(),
        _ => trimmed.trim_start_matches('@').to_lowercase(),
    }
}

fn row_to_source_connection(row: &sqlx::sqlite::SqliteRow) -> Result<SourceConnection> {
    let platform_str: String = row.get("platform");
    let platform = Platform::parse(&platform_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown platform: {platform_str}")))?;
    let capability_str: String = row.get("capability");
    let capability = Capability::parse(&capability_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown capability: {capability_str}")))?;

    Ok(SourceConnection {
        id: SourceConnectionId::parse(row.get::<String, _>("id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        brand_id: BrandId::parse(row.get::<String, _>("brand_id").as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        platform,
        capability,
        identifier: row.get("identifier"),
        is_enabled: row.get("is_enabled"),
        settings: serde_json::from_str(row.get::<String, _>("settings_json").as_str())?,
        created_at: decode_ts(row.get::<String, _>("created_at").as_str())?,
        updated_at: decode_ts(row.get::<String, _>("updated_at").as_str())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seed_brand(db: &BrandBrainDb) -> BrandId {
        let brand = Brand {
            id: BrandId::new(),
            org_id: "org-1".to_string(),
            name: "Acme".to_string(),
            slug: "acme".to_string(),
            deleted_at: None,
        };
        db.create_brand(&brand).await.unwrap();
        brand.id
    }

    fn source(brand_id: &BrandId, platform: Platform, capability: Capability, ident: &str) -> SourceConnection {
        let now = Utc::now();
        SourceConnection {
            id: SourceConnectionId::new(),
            brand_id: brand_id.clone(),
            platform,
            capability,
            identifier: ident.to_string(),
            is_enabled: true,
            settings: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(
            normalize_identifier(Platform::Instagram, " @Acme "),
            "acme"
        );
        assert_eq!(
            normalize_identifier(Platform::Web, "https://acme.example/"),
            "https://acme.example"
        );
    }

    #[tokio::test]
    async fn test_source_upsert_is_keyed_by_natural_key() {
        let db = BrandBrainDb::open_memory().await.unwrap();
        let brand_id = seed_brand(&db).await;

        let mut sc = source(&brand_id, Platform::Instagram, Capability::Posts, "@Acme");
        db.upsert_source_connection(&sc).await.unwrap();

        // Same natural key after normalization: updates rather than inserts.
        sc.id = SourceConnectionId::new();
        sc.identifier = "acme".to_string();
        sc.is_enabled = false;
        db.upsert_source_connection(&sc).await.unwrap();

        let enabled = db.list_enabled_sources(&brand_id).await.unwrap();
        assert!(enabled.is_empty());
    }

    #[tokio::test]
    async fn test_enabled_sources_stable_order() {
        let db = BrandBrainDb::open_memory().await.unwrap();
        let brand_id = seed_brand(&db).await;

        for (platform, capability, ident) in [
            (Platform::Web, Capability::CrawlPages, "https://acme.example"),
            (Platform::Instagram, Capability::Reels, "acme"),
            (Platform::Instagram, Capability::Posts, "acme"),
        ] {
            db.upsert_source_connection(&source(&brand_id, platform, capability, ident))
                .await
                .unwrap();
        }

        let sources = db.list_enabled_sources(&brand_id).await.unwrap();
        let order: Vec<(Platform, Capability)> =
            sources.iter().map(|s| (s.platform, s.capability)).collect();
        assert_eq!(
            order,
            vec![
                (Platform::Instagram, Capability::Posts),
                (Platform::Instagram, Capability::Reels),
                (Platform::Web, Capability::CrawlPages),
            ]
        );
    }

    #[tokio::test]
    async fn test_overrides_roundtrip() {
        let db = BrandBrainDb::open_memory().await.unwrap();
        let brand_id = seed_brand(&db).await;

        assert!(db.get_overrides(&brand_id).await.unwrap().is_none());

        let now = Utc::now();
        db.put_overrides(
            &brand_id,
            &json!({"voice.tone": "bold"}),
            &["voice.tone".to_string()],
            now,
        )
        .await
        .unwrap();

        let doc = db.get_overrides(&brand_id).await.unwrap().unwrap();
        assert_eq!(doc.overrides["voice.tone"], "bold");
        assert_eq!(doc.pinned_paths, vec!["voice.tone".to_string()]);
    }
}
