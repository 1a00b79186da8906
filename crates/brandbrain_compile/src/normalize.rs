//! Normalization: per-actor adapters mapping raw dataset items onto
//! canonical evidence items, plus the upsert driver.
//!
//! The adapter registry is a closed table keyed by actor id. Each adapter
//! is a plain function `&Value -> NewEvidenceItem`; no dynamic dispatch
//! beyond the fn pointer. The LinkedIn profile-posts adapter only exists
//! when its feature flag is on.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::debug;

use brandbrain_db::{BrandBrainDb, NewEvidenceItem, RawRef, UpsertOutcome};
use brandbrain_protocol::{ActorRunId, BrandBrainConfig, ContentType, Platform};

use crate::error::{CompileError, Result};

/// Longest text snippet carried on an evidence item.
const SNIPPET_MAX_CHARS: usize = 500;

pub type AdapterFn = fn(&Value) -> Result<NewEvidenceItem>;

/// Counts returned by `normalize_actor_run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeOutcome {
    pub created: u32,
    pub updated: u32,
}

/// Look up the adapter for an actor id.
///
/// `None` means adapter-missing: either an unknown actor or one that is
/// feature-gated off in this process.
pub fn adapter_for(actor_id: &str, config: &BrandBrainConfig) -> Option<AdapterFn> {
    match actor_id {
        "apify/instagram-post-scraper" => Some(instagram_post),
        "apify/instagram-reel-scraper" => Some(instagram_reel),
        "apimaestro/linkedin-company-posts" => Some(linkedin_company_post),
        "apimaestro/linkedin-profile-posts" => {
            if config.enable_linkedin_profile_posts {
                Some(linkedin_profile_post)
            } else {
                None
            }
        }
        "clockworks/tiktok-profile-scraper" => Some(tiktok_video),
        "streamers/youtube-channel-scraper" => Some(youtube_video),
        "apify/website-content-crawler" => Some(web_page),
        _ => None,
    }
}

/// Normalize up to `fetch_limit` raw items of one actor run, in ascending
/// index order, upserting each into the evidence table.
///
/// Idempotent: re-running over unchanged raw items yields zero creations
/// and the same evidence rows.
pub async fn normalize_actor_run(
    db: &BrandBrainDb,
    config: &BrandBrainConfig,
    run_id: &ActorRunId,
    fetch_limit: u32,
) -> Result<NormalizeOutcome> {
    let run = db
        .get_actor_run(run_id)
        .await?
        .ok_or_else(|| CompileError::NotFound(format!("Actor run {run_id} not found")))?;

    let adapter = adapter_for(&run.actor_id, config).ok_or_else(|| {
        CompileError::AdapterMissing(format!(
            "No normalization adapter for actor {}",
            run.actor_id
        ))
    })?;

    let now = Utc::now();
    let mut outcome = NormalizeOutcome::default();
    for raw in db.list_raw_items(run_id, fetch_limit).await? {
        let item = adapter(&raw.payload)?;
        let raw_ref = RawRef {
            actor_run_id: run.id.as_str().to_string(),
            item_index: raw.item_index,
        };
        match db
            .upsert_evidence_item(&run.brand_id, &item, raw_ref, now)
            .await?
        {
            UpsertOutcome::Created => outcome.created += 1,
            UpsertOutcome::Updated => outcome.updated += 1,
        }
    }

    debug!(
        "Normalized run {}: {} created, {} updated",
        run_id, outcome.created, outcome.updated
    );
    Ok(outcome)
}

// ============================================================================
// Field helpers
// ============================================================================

fn str_field<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| item.get(key).and_then(Value::as_str))
}

fn num_field(item: &Value, keys: &[&str]) -> i64 {
    keys.iter()
        .find_map(|key| item.get(key).and_then(Value::as_i64))
        .unwrap_or(0)
}

fn parse_published(item: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    let raw = str_field(item, keys)?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_MAX_CHARS {
        text.to_string()
    } else {
        text.chars().take(SNIPPET_MAX_CHARS).collect()
    }
}

fn require_str<'a>(item: &'a Value, keys: &[&str], what: &str) -> Result<&'a str> {
    str_field(item, keys).ok_or_else(|| {
        CompileError::Validation(format!("Raw item is missing {what} (tried {keys:?})"))
    })
}

// ============================================================================
// Adapters
// ============================================================================

fn instagram_post(item: &Value) -> Result<NewEvidenceItem> {
    let external_id = require_str(item, &["id", "shortCode"], "an instagram post id")?;
    let canonical_url = str_field(item, &["url"])
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://www.instagram.com/p/{external_id}/"));
    Ok(NewEvidenceItem {
        platform: Platform::Instagram,
        content_type: ContentType::Post,
        external_id: Some(external_id.to_string()),
        canonical_url,
        published_at: parse_published(item, &["timestamp"]),
        metrics: json!({
            "likes": num_field(item, &["likesCount"]),
            "comments": num_field(item, &["commentsCount"]),
        }),
        text_snippet: snippet(str_field(item, &["caption"]).unwrap_or_default()),
        flags: json!({}),
    })
}

fn instagram_reel(item: &Value) -> Result<NewEvidenceItem> {
    let external_id = require_str(item, &["id", "shortCode"], "an instagram reel id")?;
    let canonical_url = str_field(item, &["url"])
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://www.instagram.com/reel/{external_id}/"));
    Ok(NewEvidenceItem {
        platform: Platform::Instagram,
        content_type: ContentType::Reel,
        external_id: Some(external_id.to_string()),
        canonical_url,
        published_at: parse_published(item, &["timestamp"]),
        metrics: json!({
            "likes": num_field(item, &["likesCount"]),
            "comments": num_field(item, &["commentsCount"]),
            "views": num_field(item, &["videoPlayCount", "videoViewCount"]),
        }),
        text_snippet: snippet(str_field(item, &["caption"]).unwrap_or_default()),
        flags: json!({}),
    })
}

fn linkedin_post(item: &Value) -> Result<NewEvidenceItem> {
    let external_id = require_str(item, &["urn", "id"], "a linkedin post urn")?;
    let canonical_url = require_str(item, &["url", "postUrl"], "a linkedin post url")?;
    Ok(NewEvidenceItem {
        platform: Platform::Linkedin,
        content_type: ContentType::TextPost,
        external_id: Some(external_id.to_string()),
        canonical_url: canonical_url.to_string(),
        published_at: parse_published(item, &["postedAtISO", "postedAt"]),
        metrics: json!({
            "reactions": num_field(item, &["reactionsCount", "numLikes"]),
            "comments": num_field(item, &["commentsCount", "numComments"]),
            "shares": num_field(item, &["repostsCount", "numShares"]),
        }),
        text_snippet: snippet(str_field(item, &["text"]).unwrap_or_default()),
        flags: json!({}),
    })
}

fn linkedin_company_post(item: &Value) -> Result<NewEvidenceItem> {
    linkedin_post(item)
}

fn linkedin_profile_post(item: &Value) -> Result<NewEvidenceItem> {
    linkedin_post(item)
}

fn tiktok_video(item: &Value) -> Result<NewEvidenceItem> {
    let external_id = require_str(item, &["id"], "a tiktok video id")?;
    let canonical_url = require_str(item, &["webVideoUrl"], "a tiktok video url")?;
    Ok(NewEvidenceItem {
        platform: Platform::Tiktok,
        content_type: ContentType::ShortVideo,
        external_id: Some(external_id.to_string()),
        canonical_url: canonical_url.to_string(),
        published_at: parse_published(item, &["createTimeISO"]),
        metrics: json!({
            "likes": num_field(item, &["diggCount"]),
            "comments": num_field(item, &["commentCount"]),
            "shares": num_field(item, &["shareCount"]),
            "views": num_field(item, &["playCount"]),
        }),
        text_snippet: snippet(str_field(item, &["text"]).unwrap_or_default()),
        flags: json!({}),
    })
}

fn youtube_video(item: &Value) -> Result<NewEvidenceItem> {
    let external_id = require_str(item, &["id"], "a youtube video id")?;
    let canonical_url = str_field(item, &["url"])
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={external_id}"));
    let has_transcript = item
        .get("subtitles")
        .map(|s| s.is_array() && !s.as_array().map(Vec::is_empty).unwrap_or(true))
        .unwrap_or(false);
    Ok(NewEvidenceItem {
        platform: Platform::Youtube,
        content_type: ContentType::Video,
        external_id: Some(external_id.to_string()),
        canonical_url,
        published_at: parse_published(item, &["date", "uploadDate"]),
        metrics: json!({
            "likes": num_field(item, &["likes"]),
            "comments": num_field(item, &["commentsCount"]),
            "views": num_field(item, &["viewCount"]),
        }),
        text_snippet: snippet(str_field(item, &["text", "description", "title"]).unwrap_or_default()),
        flags: json!({"has_transcript": has_transcript}),
    })
}

fn web_page(item: &Value) -> Result<NewEvidenceItem> {
    let canonical_url = require_str(item, &["canonicalUrl", "loadedUrl", "url"], "a page url")?;
    let is_collection_page = item
        .get("isCollectionPage")
        .and_then(Value::as_bool)
        .unwrap_or_else(|| looks_like_collection_page(canonical_url));
    Ok(NewEvidenceItem {
        platform: Platform::Web,
        content_type: ContentType::WebPage,
        external_id: None,
        canonical_url: canonical_url.trim_end_matches('/').to_string(),
        published_at: parse_published(item, &["publishedAt"]),
        metrics: json!({}),
        text_snippet: snippet(str_field(item, &["text"]).unwrap_or_default()),
        flags: json!({"is_collection_page": is_collection_page}),
    })
}

/// URL heuristic for listing/hub pages, used when the crawler does not
/// label the page itself.
fn looks_like_collection_page(url: &str) -> bool {
    let path = url
        .splitn(4, '/')
        .nth(3)
        .unwrap_or("")
        .trim_end_matches('/');
    if path.is_empty() {
        return true;
    }
    ["category/", "tag/", "archive/", "blog/page/"]
        .iter()
        .any(|prefix| path.starts_with(prefix))
        || matches!(path, "blog" | "news" | "articles")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instagram_post_adapter() {
        let raw = json!({
            "id": "317",
            "shortCode": "Cxyz",
            "url": "https://www.instagram.com/p/Cxyz/",
            "timestamp": "2026-03-01T10:00:00+00:00",
            "likesCount": 120,
            "commentsCount": 7,
            "caption": "New drop."
        });
        let item = instagram_post(&raw).unwrap();
        assert_eq!(item.external_id.as_deref(), Some("317"));
        assert_eq!(item.metrics["likes"], 120);
        assert_eq!(item.content_type, ContentType::Post);
        assert!(item.published_at.is_some());
    }

    #[test]
    fn test_instagram_post_requires_id() {
        let raw = json!({"caption": "no id here"});
        assert!(matches!(
            instagram_post(&raw),
            Err(CompileError::Validation(_))
        ));
    }

    #[test]
    fn test_web_page_explicit_flag_wins_over_heuristic() {
        let raw = json!({
            "url": "https://acme.example/blog/some-deep-post",
            "isCollectionPage": true,
            "text": "post list"
        });
        let item = web_page(&raw).unwrap();
        assert_eq!(item.flags["is_collection_page"], true);
        assert!(item.external_id.is_none());
    }

    #[test]
    fn test_web_page_heuristic_flags_root_and_listings() {
        for url in [
            "https://acme.example/",
            "https://acme.example/blog",
            "https://acme.example/category/press/",
        ] {
            let item = web_page(&json!({"url": url, "text": ""})).unwrap();
            assert_eq!(item.flags["is_collection_page"], true, "url: {url}");
        }
        let article = web_page(&json!({
            "url": "https://acme.example/blog/why-we-built-this",
            "text": "body"
        }))
        .unwrap();
        assert_eq!(article.flags["is_collection_page"], false);
    }

    #[test]
    fn test_snippet_truncation() {
        let long = "x".repeat(2 * SNIPPET_MAX_CHARS);
        assert_eq!(snippet(&long).chars().count(), SNIPPET_MAX_CHARS);
    }

    #[test]
    fn test_profile_posts_adapter_is_feature_gated() {
        let config = BrandBrainConfig::default();
        assert!(adapter_for("apimaestro/linkedin-profile-posts", &config).is_none());
        assert!(adapter_for("apimaestro/linkedin-company-posts", &config).is_some());

        let mut enabled = config.clone();
        enabled.enable_linkedin_profile_posts = true;
        assert!(adapter_for("apimaestro/linkedin-profile-posts", &enabled).is_some());
    }

    #[test]
    fn test_unknown_actor_has_no_adapter() {
        let config = BrandBrainConfig::default();
        assert!(adapter_for("someone/some-new-actor", &config).is_none());
    }

    #[test]
    fn test_youtube_transcript_flag() {
        let with = youtube_video(&json!({
            "id": "v1",
            "subtitles": [{"language": "en"}],
            "title": "Launch"
        }))
        .unwrap();
        assert_eq!(with.flags["has_transcript"], true);

        let without = youtube_video(&json!({"id": "v2", "title": "Teaser"})).unwrap();
        assert_eq!(without.flags["has_transcript"], false);
    }
}
