//! Ingestion: run an actor for one source, store raw items, normalize.
//!
//! The per-capability cap is enforced three times: it shapes the actor
//! input, bounds the dataset fetch, and bounds normalization.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use brandbrain_apify::{ActorClient, ActorClientError};
use brandbrain_db::{ActorRun, BrandBrainDb, SourceConnection};
use brandbrain_protocol::{
    content_type_for, ActorRunId, ActorRunStatus, BrandBrainConfig, Capability, Platform,
};

use crate::error::{CompileError, Result};
use crate::normalize;

/// Per-source ingestion outcome, recorded into the evidence status.
#[derive(Debug, Clone, Default)]
pub struct IngestionResult {
    pub success: bool,
    pub skipped: bool,
    pub apify_run_id: Option<String>,
    pub apify_run_status: Option<ActorRunStatus>,
    pub raw_items_count: u32,
    pub normalized_created: u32,
    pub normalized_updated: u32,
    pub error: Option<String>,
}

/// Which actor serves a capability and how to build its input.
pub struct ActorSpec {
    pub actor_id: &'static str,
    pub build_input: fn(&SourceConnection, u32) -> Value,
}

/// Resolve the actor spec for a `(platform, capability)` stream.
pub fn actor_spec_for(platform: Platform, capability: Capability) -> Option<ActorSpec> {
    let spec = match (platform, capability) {
        (Platform::Instagram, Capability::Posts) => ActorSpec {
            actor_id: "apify/instagram-post-scraper",
            build_input: |sc, cap| json!({"username": [sc.identifier], "resultsLimit": cap}),
        },
        (Platform::Instagram, Capability::Reels) => ActorSpec {
            actor_id: "apify/instagram-reel-scraper",
            build_input: |sc, cap| json!({"username": [sc.identifier], "resultsLimit": cap}),
        },
        (Platform::Linkedin, Capability::CompanyPosts) => ActorSpec {
            actor_id: "apimaestro/linkedin-company-posts",
            build_input: |sc, cap| json!({"companyUrl": sc.identifier, "maxPosts": cap}),
        },
        (Platform::Linkedin, Capability::ProfilePosts) => ActorSpec {
            actor_id: "apimaestro/linkedin-profile-posts",
            build_input: |sc, cap| json!({"profileUrl": sc.identifier, "maxPosts": cap}),
        },
        (Platform::Tiktok, Capability::ProfileVideos) => ActorSpec {
            actor_id: "clockworks/tiktok-profile-scraper",
            build_input: |sc, cap| json!({"profiles": [sc.identifier], "resultsPerPage": cap}),
        },
        (Platform::Youtube, Capability::ChannelVideos) => ActorSpec {
            actor_id: "streamers/youtube-channel-scraper",
            build_input: |sc, cap| json!({"channelUrls": [sc.identifier], "maxVideos": cap}),
        },
        (Platform::Web, Capability::CrawlPages) => ActorSpec {
            actor_id: "apify/website-content-crawler",
            build_input: web_crawl_input,
        },
        _ => return None,
    };
    Some(spec)
}

fn web_crawl_input(sc: &SourceConnection, cap: u32) -> Value {
    let mut start_urls = vec![json!({"url": sc.identifier})];
    if let Some(extra) = sc.settings.get("extra_start_urls").and_then(Value::as_array) {
        for url in extra.iter().filter_map(Value::as_str) {
            start_urls.push(json!({"url": url}));
        }
    }
    let max_depth = sc
        .settings
        .get("max_depth")
        .and_then(Value::as_u64)
        .unwrap_or(2);
    json!({
        "startUrls": start_urls,
        "maxCrawlPages": cap,
        "maxCrawlDepth": max_depth,
    })
}

/// The ingestion cap for a stream, via its content type's configured cap.
pub fn cap_for_stream(
    config: &BrandBrainConfig,
    platform: Platform,
    capability: Capability,
) -> Option<u32> {
    let content_type = content_type_for(platform, capability)?;
    config.cap_for(platform, content_type)
}

/// Runs actors for sources and stores their output.
pub struct Ingestor {
    db: BrandBrainDb,
    client: Arc<dyn ActorClient>,
    config: Arc<BrandBrainConfig>,
}

impl Ingestor {
    pub fn new(db: BrandBrainDb, client: Arc<dyn ActorClient>, config: Arc<BrandBrainConfig>) -> Self {
        Self { db, client, config }
    }

    /// Ingest one source end to end.
    ///
    /// Actor-level failures (timeout, transport, non-SUCCEEDED terminal)
    /// come back inside the `IngestionResult`; an `Err` means the
    /// persistence layer itself failed and the whole job should retry.
    pub async fn ingest_source(&self, sc: &SourceConnection) -> Result<IngestionResult> {
        if !self.config.is_capability_enabled(sc.platform, sc.capability) {
            return Ok(IngestionResult {
                success: true,
                skipped: true,
                ..Default::default()
            });
        }

        let Some(spec) = actor_spec_for(sc.platform, sc.capability) else {
            return Err(CompileError::AdapterMissing(format!(
                "No actor registered for {}.{}",
                sc.platform, sc.capability
            )));
        };
        let cap = cap_for_stream(&self.config, sc.platform, sc.capability).ok_or_else(|| {
            CompileError::Unknown(format!(
                "No cap configured for {}.{}",
                sc.platform, sc.capability
            ))
        })?;

        let input = (spec.build_input)(sc, cap);
        let started = match self.client.start_run(spec.actor_id, &input).await {
            Ok(info) => info,
            Err(e) => {
                warn!("Actor start failed for {}: {}", sc.identifier, e);
                return Ok(IngestionResult {
                    success: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                });
            }
        };

        let run = ActorRun {
            id: ActorRunId::new(),
            brand_id: sc.brand_id.clone(),
            source_connection_id: sc.id.clone(),
            actor_id: spec.actor_id.to_string(),
            input,
            apify_run_id: Some(started.run_id.clone()),
            apify_dataset_id: Some(started.dataset_id.clone()),
            status: ActorRunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error_summary: None,
            raw_item_count: 0,
        };
        self.db.insert_actor_run(&run).await?;

        let info = match self
            .client
            .poll_run(
                &started.run_id,
                Duration::from_secs(self.config.actor_poll_timeout_s),
                Duration::from_secs(self.config.actor_poll_interval_s),
            )
            .await
        {
            Ok(info) => info,
            Err(e) => {
                let (status, summary) = match &e {
                    ActorClientError::Timeout { .. } => (ActorRunStatus::TimedOut, e.to_string()),
                    other => (ActorRunStatus::Failed, other.to_string()),
                };
                self.db
                    .update_actor_run_status(&run.id, status, Some(Utc::now()), Some(&summary))
                    .await?;
                return Ok(IngestionResult {
                    success: false,
                    apify_run_id: Some(started.run_id),
                    apify_run_status: Some(status),
                    error: Some(summary),
                    ..Default::default()
                });
            }
        };

        if info.status != ActorRunStatus::Succeeded {
            let summary = format!("Actor run ended {}", info.status);
            self.db
                .update_actor_run_status(&run.id, info.status, Some(Utc::now()), Some(&summary))
                .await?;
            return Ok(IngestionResult {
                success: false,
                apify_run_id: Some(started.run_id),
                apify_run_status: Some(info.status),
                error: Some(summary),
                ..Default::default()
            });
        }

        // Dataset-fetch cap enforcement point.
        let items = match self.client.fetch_items(&info.dataset_id, cap, 0).await {
            Ok(items) => items,
            Err(e) => {
                self.db
                    .update_actor_run_status(
                        &run.id,
                        ActorRunStatus::Failed,
                        Some(Utc::now()),
                        Some(&e.to_string()),
                    )
                    .await?;
                return Ok(IngestionResult {
                    success: false,
                    apify_run_id: Some(started.run_id),
                    apify_run_status: Some(ActorRunStatus::Failed),
                    error: Some(e.to_string()),
                    ..Default::default()
                });
            }
        };

        let raw_count = self.db.replace_raw_items(&run.id, &items).await?;
        self.db
            .update_actor_run_status(&run.id, ActorRunStatus::Succeeded, Some(Utc::now()), None)
            .await?;

        let normalized =
            match normalize::normalize_actor_run(&self.db, &self.config, &run.id, cap).await {
                Ok(outcome) => outcome,
                Err(CompileError::AdapterMissing(msg)) => {
                    return Ok(IngestionResult {
                        success: false,
                        apify_run_id: Some(started.run_id),
                        apify_run_status: Some(ActorRunStatus::Succeeded),
                        raw_items_count: raw_count,
                        error: Some(msg),
                        ..Default::default()
                    })
                }
                Err(e) => return Err(e),
            };

        info!(
            "Ingested {}.{} ({}): {} raw, {} created, {} updated",
            sc.platform, sc.capability, sc.identifier, raw_count, normalized.created,
            normalized.updated
        );
        Ok(IngestionResult {
            success: true,
            skipped: false,
            apify_run_id: Some(started.run_id),
            apify_run_status: Some(ActorRunStatus::Succeeded),
            raw_items_count: raw_count,
            normalized_created: normalized.created,
            normalized_updated: normalized.updated,
            error: None,
        })
    }
}
