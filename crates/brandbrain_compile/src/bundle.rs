//! The bundler: deterministic evidence selection under caps.
//!
//! Per (platform, content-type) pair: the most recent `recent_M` items plus
//! the top `top_engagement_N` of the remainder, capped per pair; then a
//! global cap with a full resort; then a platform-grouped final order.
//! Given the same candidates and criteria, two runs produce byte-identical
//! item id lists and summaries.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use brandbrain_db::{BrandBrainDb, EvidenceBundle, EvidenceItem};
use brandbrain_protocol::{
    BrandBrainConfig, BrandId, BundleCriteria, BundleId, BundleSummary, EvidenceItemId,
    PairSummary, Platform, TranscriptCoverage,
};

use crate::error::{CompileError, Result};

/// Floor for the bounded engagement slice; the real bound is
/// `max(SLICE_FLOOR, 4 · top_engagement_N)`.
const SLICE_FLOOR: u32 = 100;

/// One selected item with its score, kept until the final ordering.
struct Scored {
    item: EvidenceItem,
    score: f64,
}

pub struct Bundler {
    db: BrandBrainDb,
    config: Arc<BrandBrainConfig>,
}

impl Bundler {
    pub fn new(db: BrandBrainDb, config: Arc<BrandBrainConfig>) -> Self {
        Self { db, config }
    }

    /// Assemble and persist a bundle over the brand's current candidates.
    pub async fn assemble(
        &self,
        brand_id: &BrandId,
        enabled_platforms: &[Platform],
        now: DateTime<Utc>,
    ) -> Result<EvidenceBundle> {
        let pairs = self.db.candidate_pairs(brand_id, enabled_platforms).await?;
        let has_non_web = self
            .db
            .candidates_have_non_web(brand_id, enabled_platforms)
            .await?;

        let recent_m = self.config.recent_m;
        let top_n = self.config.top_engagement_n;
        let slice_limit = SLICE_FLOOR.max(4 * top_n);

        let mut union: Vec<Scored> = Vec::new();
        let mut per_pair: Vec<PairSummary> = Vec::new();
        let mut excluded_collection_pages = 0u32;
        let mut web_only_exception = false;

        for (platform, content_type) in pairs {
            // Collection pages drop out of web pairs unless web is the only
            // evidence there is, in which case they are kept (and flagged).
            let mut exclude_cp = false;
            if platform == Platform::Web && self.config.exclude_collection_pages {
                if has_non_web {
                    exclude_cp = true;
                    excluded_collection_pages += self
                        .db
                        .count_pair_collection_pages(brand_id, platform, content_type)
                        .await?;
                } else {
                    web_only_exception = true;
                }
            }

            let cap_pc = self.config.cap_for(platform, content_type).ok_or_else(|| {
                CompileError::Unknown(format!(
                    "No cap configured for {platform}.{content_type}"
                ))
            })?;

            let recent = self
                .db
                .pair_recent(brand_id, platform, content_type, exclude_cp, recent_m)
                .await?;
            let recent_ids: Vec<EvidenceItemId> = recent.iter().map(|i| i.id.clone()).collect();

            let pool = self
                .db
                .pair_engagement_slice(
                    brand_id,
                    platform,
                    content_type,
                    exclude_cp,
                    &recent_ids,
                    slice_limit,
                )
                .await?;

            let mut scored_pool: Vec<Scored> = pool
                .into_iter()
                .map(|item| {
                    let score = engagement_score(platform, &item);
                    Scored { item, score }
                })
                .collect();
            scored_pool.sort_by(selection_order);
            scored_pool.truncate(top_n as usize);

            // R then S, deduped, capped.
            let pair_cap = cap_pc.min(recent_m + top_n) as usize;
            let mut seen: BTreeSet<EvidenceItemId> = BTreeSet::new();
            let mut selected: Vec<Scored> = Vec::new();
            for item in recent {
                if selected.len() >= pair_cap {
                    break;
                }
                if seen.insert(item.id.clone()) {
                    let score = engagement_score(platform, &item);
                    selected.push(Scored { item, score });
                }
            }
            for scored in scored_pool {
                if selected.len() >= pair_cap {
                    break;
                }
                if seen.insert(scored.item.id.clone()) {
                    selected.push(scored);
                }
            }

            let eligible = self
                .db
                .count_pair_eligible(brand_id, platform, content_type, exclude_cp)
                .await?;
            per_pair.push(PairSummary {
                platform,
                content_type,
                eligible,
                selected: selected.len() as u32,
                cap: cap_pc,
            });
            union.extend(selected);
        }

        // Global cap: resort the whole union and truncate.
        if union.len() > self.config.global_max_items as usize {
            union.sort_by(selection_order);
            union.truncate(self.config.global_max_items as usize);
            // Selected counts reflect the final set.
            for summary in &mut per_pair {
                summary.selected = union
                    .iter()
                    .filter(|s| {
                        s.item.platform == summary.platform
                            && s.item.content_type == summary.content_type
                    })
                    .count() as u32;
            }
        }

        // Final deterministic order: platform groups, scored order within.
        union.sort_by(|a, b| {
            platform_rank(a.item.platform)
                .cmp(&platform_rank(b.item.platform))
                .then_with(|| selection_order(a, b))
        });

        let with_transcript = union
            .iter()
            .filter(|s| s.item.flag("has_transcript"))
            .count() as u32;
        let total = union.len() as u32;
        let summary = BundleSummary {
            per_pair,
            excluded_collection_pages,
            web_only_exception,
            transcript_coverage: TranscriptCoverage {
                items_with_transcript: with_transcript,
                total,
                coverage_ratio: if total == 0 {
                    0.0
                } else {
                    f64::from(with_transcript) / f64::from(total)
                },
            },
        };

        let bundle = EvidenceBundle {
            id: BundleId::new(),
            brand_id: brand_id.clone(),
            criteria: self.criteria(),
            item_ids: union.iter().map(|s| s.item.id.clone()).collect(),
            summary,
            created_at: now,
        };
        self.db.insert_bundle(&bundle).await?;
        info!(
            "Bundled {} items for brand {} ({} pairs)",
            bundle.item_ids.len(),
            brand_id,
            bundle.summary.per_pair.len()
        );
        Ok(bundle)
    }

    fn criteria(&self) -> BundleCriteria {
        BundleCriteria {
            recent_m: self.config.recent_m,
            top_engagement_n: self.config.top_engagement_n,
            global_cap: self.config.global_max_items,
            exclude_collection_pages: self.config.exclude_collection_pages,
            caps: self.config.caps_by_label(),
            linkedin_profile_posts_enabled: self.config.enable_linkedin_profile_posts,
        }
    }
}

/// Engagement score: a pure per-platform linear combination of metrics.
/// Web pages score zero.
pub fn engagement_score(platform: Platform, item: &EvidenceItem) -> f64 {
    match platform {
        Platform::Instagram => item.metric("likes") + 2.0 * item.metric("comments"),
        Platform::Linkedin => {
            item.metric("reactions") + 2.0 * item.metric("comments") + 3.0 * item.metric("shares")
        }
        Platform::Tiktok => {
            item.metric("likes")
                + 2.0 * item.metric("comments")
                + 4.0 * item.metric("shares")
                + item.metric("views") / 100.0
        }
        Platform::Youtube => {
            5.0 * item.metric("likes")
                + 10.0 * item.metric("comments")
                + item.metric("views") / 100.0
        }
        Platform::Web => 0.0,
    }
}

/// `(score DESC, published_at DESC NULLS LAST, canonical_url ASC)`.
fn selection_order(a: &Scored, b: &Scored) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| cmp_published_desc_nulls_last(a.item.published_at, b.item.published_at))
        .then_with(|| a.item.canonical_url.cmp(&b.item.canonical_url))
}

fn cmp_published_desc_nulls_last(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn platform_rank(platform: Platform) -> usize {
    Platform::ALL
        .iter()
        .position(|p| *p == platform)
        .unwrap_or(Platform::ALL.len())
}
