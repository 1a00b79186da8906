//! Freshness decisions and the compile input hash.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use brandbrain_db::{ActorRun, BrandBrainDb, SourceConnection};
use brandbrain_protocol::{
    compute_input_hash, BrandBrainConfig, BrandId, SourceProjection,
};

use crate::error::Result;

/// Settings keys that change what an actor ingests. Everything else is
/// cosmetic and must not reach the input hash.
const BEHAVIORAL_SETTINGS: [&str; 2] = ["extra_start_urls", "max_depth"];

/// Outcome of a per-source freshness check.
#[derive(Debug, Clone)]
pub struct Freshness {
    pub should_refresh: bool,
    pub cached_run: Option<ActorRun>,
    pub reason: String,
    pub age_hours: Option<f64>,
}

/// Decide refresh vs. reuse for one source against the latest SUCCEEDED
/// actor run and the TTL.
pub async fn check_freshness(
    db: &BrandBrainDb,
    sc: &SourceConnection,
    force_refresh: bool,
    ttl_hours: i64,
    now: DateTime<Utc>,
) -> Result<Freshness> {
    if force_refresh {
        return Ok(Freshness {
            should_refresh: true,
            cached_run: None,
            reason: "force_refresh requested".to_string(),
            age_hours: None,
        });
    }

    let Some(run) = db.latest_succeeded_run(&sc.id).await? else {
        return Ok(Freshness {
            should_refresh: true,
            cached_run: None,
            reason: "no successful run on record".to_string(),
            age_hours: None,
        });
    };

    let age_hours = (now - run.started_at).num_milliseconds() as f64 / 3_600_000.0;
    if age_hours > ttl_hours as f64 {
        Ok(Freshness {
            should_refresh: true,
            cached_run: Some(run),
            reason: format!("last run is {age_hours:.1}h old (TTL {ttl_hours}h)"),
            age_hours: Some(age_hours),
        })
    } else {
        Ok(Freshness {
            should_refresh: false,
            cached_run: Some(run),
            reason: format!("last run is {age_hours:.1}h old, within TTL {ttl_hours}h"),
            age_hours: Some(age_hours),
        })
    }
}

/// True if any enabled (and capability-enabled) source would refresh.
pub async fn any_source_stale(
    db: &BrandBrainDb,
    config: &BrandBrainConfig,
    brand_id: &BrandId,
    now: DateTime<Utc>,
) -> Result<bool> {
    for sc in db.list_enabled_sources(brand_id).await? {
        if !config.is_capability_enabled(sc.platform, sc.capability) {
            continue;
        }
        let freshness = check_freshness(db, &sc, false, config.actor_ttl_hours, now).await?;
        if freshness.should_refresh {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Assemble the input hash for a brand from its current onboarding,
/// overrides, enabled sources, and the configured prompt version + model.
pub async fn input_hash_for_brand(
    db: &BrandBrainDb,
    config: &BrandBrainConfig,
    brand_id: &BrandId,
) -> Result<String> {
    let onboarding = db
        .get_onboarding(brand_id)
        .await?
        .map(|o| o.answers)
        .unwrap_or_else(|| json!({}));

    let (overrides, pinned_paths) = match db.get_overrides(brand_id).await? {
        Some(doc) => (doc.overrides, doc.pinned_paths),
        None => (json!({}), Vec::new()),
    };

    let sources: Vec<SourceProjection> = db
        .list_enabled_sources(brand_id)
        .await?
        .iter()
        .map(|sc| SourceProjection {
            platform: sc.platform,
            capability: sc.capability,
            identifier: sc.identifier.clone(),
            settings_subset: settings_subset(&sc.settings),
        })
        .collect();

    Ok(compute_input_hash(
        &onboarding,
        &overrides,
        &pinned_paths,
        &sources,
        &config.prompt_version,
        &config.model,
    ))
}

/// Project a settings map down to its behavioral keys.
fn settings_subset(settings: &Value) -> Value {
    let mut subset = Map::new();
    if let Some(map) = settings.as_object() {
        for key in BEHAVIORAL_SETTINGS {
            if let Some(value) = map.get(key) {
                subset.insert(key.to_string(), value.clone());
            }
        }
    }
    Value::Object(subset)
}
