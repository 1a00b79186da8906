//! Runtime configuration.
//!
//! Defaults are compiled in; every knob can be overridden from the
//! environment. Loaded once at process start and shared behind an `Arc`.

use std::collections::BTreeMap;

use crate::types::{ContentType, Platform};

/// Default global cap on bundle size.
pub const DEFAULT_GLOBAL_MAX_ITEMS: u32 = 40;
/// Default freshness TTL for cached actor runs.
pub const DEFAULT_ACTOR_TTL_HOURS: i64 = 24;
/// Default stale-lock threshold for the job queue.
pub const DEFAULT_STALE_LOCK_MINUTES: i64 = 10;
/// Default heartbeat cadence; must stay well under the stale threshold.
pub const DEFAULT_HEARTBEAT_INTERVAL_S: u64 = 30;
/// Default retry backoff base.
pub const DEFAULT_BACKOFF_BASE_SECONDS: i64 = 30;
/// Default retry backoff multiplier.
pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;
/// Default wall budget for polling one actor run to terminal.
pub const DEFAULT_ACTOR_POLL_TIMEOUT_S: u64 = 600;
/// Default sleep between actor poll requests.
pub const DEFAULT_ACTOR_POLL_INTERVAL_S: u64 = 5;
/// Default bundler recency window.
pub const DEFAULT_RECENT_M: u32 = 3;
/// Default bundler engagement window.
pub const DEFAULT_TOP_ENGAGEMENT_N: u32 = 5;

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct BrandBrainConfig {
    pub database_url: String,
    pub apify_api_token: String,
    pub apify_base_url: String,
    pub global_max_items: u32,
    pub actor_ttl_hours: i64,
    pub stale_lock_minutes: i64,
    pub heartbeat_interval_s: u64,
    pub backoff_base_seconds: i64,
    pub backoff_multiplier: u32,
    pub actor_poll_timeout_s: u64,
    pub actor_poll_interval_s: u64,
    pub recent_m: u32,
    pub top_engagement_n: u32,
    pub exclude_collection_pages: bool,
    pub enable_linkedin_profile_posts: bool,
    pub prompt_version: String,
    pub model: String,
    caps: BTreeMap<(Platform, ContentType), u32>,
}

impl Default for BrandBrainConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:brandbrain.db?mode=rwc".to_string(),
            apify_api_token: String::new(),
            apify_base_url: "https://api.apify.com".to_string(),
            global_max_items: DEFAULT_GLOBAL_MAX_ITEMS,
            actor_ttl_hours: DEFAULT_ACTOR_TTL_HOURS,
            stale_lock_minutes: DEFAULT_STALE_LOCK_MINUTES,
            heartbeat_interval_s: DEFAULT_HEARTBEAT_INTERVAL_S,
            backoff_base_seconds: DEFAULT_BACKOFF_BASE_SECONDS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            actor_poll_timeout_s: DEFAULT_ACTOR_POLL_TIMEOUT_S,
            actor_poll_interval_s: DEFAULT_ACTOR_POLL_INTERVAL_S,
            recent_m: DEFAULT_RECENT_M,
            top_engagement_n: DEFAULT_TOP_ENGAGEMENT_N,
            exclude_collection_pages: true,
            enable_linkedin_profile_posts: false,
            prompt_version: "v1".to_string(),
            model: "stub".to_string(),
            caps: default_caps(),
        }
    }
}

fn default_caps() -> BTreeMap<(Platform, ContentType), u32> {
    BTreeMap::from([
        ((Platform::Instagram, ContentType::Post), 30),
        ((Platform::Instagram, ContentType::Reel), 20),
        ((Platform::Linkedin, ContentType::TextPost), 30),
        ((Platform::Tiktok, ContentType::ShortVideo), 20),
        ((Platform::Youtube, ContentType::Video), 20),
        ((Platform::Web, ContentType::WebPage), 40),
    ])
}

impl BrandBrainConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(token) = std::env::var("APIFY_API_TOKEN") {
            config.apify_api_token = token;
        }
        if let Ok(base) = std::env::var("APIFY_BASE_URL") {
            config.apify_base_url = base;
        }
        if let Ok(v) = std::env::var("BRANDBRAIN_PROMPT_VERSION") {
            config.prompt_version = v;
        }
        if let Ok(v) = std::env::var("BRANDBRAIN_MODEL") {
            config.model = v;
        }

        env_parse("BRANDBRAIN_GLOBAL_MAX_ITEMS", &mut config.global_max_items);
        env_parse("BRANDBRAIN_ACTOR_TTL_HOURS", &mut config.actor_ttl_hours);
        env_parse("BRANDBRAIN_STALE_LOCK_MINUTES", &mut config.stale_lock_minutes);
        env_parse(
            "BRANDBRAIN_HEARTBEAT_INTERVAL_S",
            &mut config.heartbeat_interval_s,
        );
        env_parse(
            "BRANDBRAIN_BACKOFF_BASE_SECONDS",
            &mut config.backoff_base_seconds,
        );
        env_parse("BRANDBRAIN_BACKOFF_MULTIPLIER", &mut config.backoff_multiplier);
        env_parse(
            "BRANDBRAIN_ACTOR_POLL_TIMEOUT_S",
            &mut config.actor_poll_timeout_s,
        );
        env_parse(
            "BRANDBRAIN_ACTOR_POLL_INTERVAL_S",
            &mut config.actor_poll_interval_s,
        );
        env_parse("BRANDBRAIN_RECENT_M", &mut config.recent_m);
        env_parse("BRANDBRAIN_TOP_ENGAGEMENT_N", &mut config.top_engagement_n);

        config.enable_linkedin_profile_posts =
            std::env::var("BRANDBRAIN_ENABLE_LINKEDIN_PROFILE_POSTS").is_ok();

        for ((platform, content_type), cap) in config.caps.clone() {
            let key = format!(
                "BRANDBRAIN_CAP_{}_{}",
                platform.as_str().to_uppercase(),
                content_type.as_str().to_uppercase()
            );
            let mut value = cap;
            env_parse(&key, &mut value);
            config.caps.insert((platform, content_type), value);
        }

        config
    }

    /// Per-(platform, content-type) cap. `None` for unknown pairs — the
    /// bundler treats that as a hard error rather than guessing a limit.
    pub fn cap_for(&self, platform: Platform, content_type: ContentType) -> Option<u32> {
        self.caps.get(&(platform, content_type)).copied()
    }

    /// Caps table keyed `"<platform>.<content_type>"` for criteria snapshots.
    pub fn caps_by_label(&self) -> BTreeMap<String, u32> {
        self.caps
            .iter()
            .map(|((p, c), cap)| (format!("{}.{}", p.as_str(), c.as_str()), *cap))
            .collect()
    }

    /// Whether a `(platform, capability)` stream is enabled in this process.
    ///
    /// LinkedIn profile posts are feature-flagged off by default; everything
    /// else that maps to a content type is enabled.
    pub fn is_capability_enabled(
        &self,
        platform: Platform,
        capability: crate::types::Capability,
    ) -> bool {
        if crate::types::content_type_for(platform, capability).is_none() {
            return false;
        }
        if platform == Platform::Linkedin && capability == crate::types::Capability::ProfilePosts {
            return self.enable_linkedin_profile_posts;
        }
        true
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(value) = raw.parse() {
            *slot = value;
        }
    }
}
