//! Core enums and documents shared by every BrandBrain crate.
//!
//! Status enums carry `as_str`/`parse` next to their serde derives so the
//! database layer and the JSON boundary always agree on spelling.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Platforms & capabilities
// ============================================================================

/// Content platform of a source connection or evidence item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Linkedin,
    Tiktok,
    Youtube,
    Web,
}

impl Platform {
    /// All platforms in their canonical (stable) order.
    pub const ALL: [Platform; 5] = [
        Self::Instagram,
        Self::Linkedin,
        Self::Tiktok,
        Self::Youtube,
        Self::Web,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Linkedin => "linkedin",
            Self::Tiktok => "tiktok",
            Self::Youtube => "youtube",
            Self::Web => "web",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "instagram" => Some(Self::Instagram),
            "linkedin" => Some(Self::Linkedin),
            "tiktok" => Some(Self::Tiktok),
            "youtube" => Some(Self::Youtube),
            "web" => Some(Self::Web),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Platform-scoped content stream of a source connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Posts,
    Reels,
    CompanyPosts,
    ProfilePosts,
    ProfileVideos,
    ChannelVideos,
    CrawlPages,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Reels => "reels",
            Self::CompanyPosts => "company_posts",
            Self::ProfilePosts => "profile_posts",
            Self::ProfileVideos => "profile_videos",
            Self::ChannelVideos => "channel_videos",
            Self::CrawlPages => "crawl_pages",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "posts" => Some(Self::Posts),
            "reels" => Some(Self::Reels),
            "company_posts" => Some(Self::CompanyPosts),
            "profile_posts" => Some(Self::ProfilePosts),
            "profile_videos" => Some(Self::ProfileVideos),
            "channel_videos" => Some(Self::ChannelVideos),
            "crawl_pages" => Some(Self::CrawlPages),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical content type of a normalized evidence item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Post,
    Reel,
    TextPost,
    ShortVideo,
    Video,
    WebPage,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Reel => "reel",
            Self::TextPost => "text_post",
            Self::ShortVideo => "short_video",
            Self::Video => "video",
            Self::WebPage => "web_page",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "post" => Some(Self::Post),
            "reel" => Some(Self::Reel),
            "text_post" => Some(Self::TextPost),
            "short_video" => Some(Self::ShortVideo),
            "video" => Some(Self::Video),
            "web_page" => Some(Self::WebPage),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The content type a given `(platform, capability)` stream produces.
///
/// Returns `None` for pairs that are not a valid stream.
pub fn content_type_for(platform: Platform, capability: Capability) -> Option<ContentType> {
    match (platform, capability) {
        (Platform::Instagram, Capability::Posts) => Some(ContentType::Post),
        (Platform::Instagram, Capability::Reels) => Some(ContentType::Reel),
        (Platform::Linkedin, Capability::CompanyPosts) => Some(ContentType::TextPost),
        (Platform::Linkedin, Capability::ProfilePosts) => Some(ContentType::TextPost),
        (Platform::Tiktok, Capability::ProfileVideos) => Some(ContentType::ShortVideo),
        (Platform::Youtube, Capability::ChannelVideos) => Some(ContentType::Video),
        (Platform::Web, Capability::CrawlPages) => Some(ContentType::WebPage),
        _ => None,
    }
}

/// `"<platform>.<capability>"` label used in evidence-status entries.
pub fn source_label(platform: Platform, capability: Capability) -> String {
    format!("{}.{}", platform.as_str(), capability.as_str())
}

// ============================================================================
// Status enums
// ============================================================================

/// Status of an upstream actor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRunStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl ActorRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Aborted => "ABORTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "TIMED_OUT" | "TIMED-OUT" => Some(Self::TimedOut),
            "ABORTED" => Some(Self::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ActorRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a compile run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompileStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl CompileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for CompileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of work a job represents. Only `compile` exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Compile,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compile => "compile",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "compile" => Some(Self::Compile),
            _ => None,
        }
    }
}

// ============================================================================
// Evidence status document
// ============================================================================

/// Per-source outcome report accumulated while a compile run iterates its
/// enabled sources. Serialized onto the compile run and surfaced by the
/// status and latest endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvidenceStatus {
    pub reused: Vec<ReusedSource>,
    pub refreshed: Vec<RefreshedSource>,
    pub skipped: Vec<SkippedSource>,
    pub failed: Vec<FailedSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReusedSource {
    pub source: String,
    pub reason: String,
    pub run_age_hours: f64,
    pub apify_run_id: String,
    pub normalized_created: u32,
    pub normalized_updated: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshedSource {
    pub source: String,
    pub reason: String,
    pub apify_run_id: String,
    pub apify_run_status: ActorRunStatus,
    pub raw_items_count: u32,
    pub normalized_created: u32,
    pub normalized_updated: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedSource {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedSource {
    pub source: String,
    pub reason: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apify_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apify_run_status: Option<ActorRunStatus>,
}

// ============================================================================
// Bundle criteria & summary
// ============================================================================

/// The configuration snapshot an evidence bundle was produced under.
/// Stored verbatim on the bundle so a bundle is reproducible from its row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleCriteria {
    pub recent_m: u32,
    pub top_engagement_n: u32,
    pub global_cap: u32,
    pub exclude_collection_pages: bool,
    /// Caps in effect, keyed `"<platform>.<content_type>"`.
    pub caps: std::collections::BTreeMap<String, u32>,
    /// Containment of unvalidated linkedin profile posts happens upstream
    /// (capability gate + adapter gate); recorded here for documentation.
    pub linkedin_profile_posts_enabled: bool,
}

/// Feature report describing what the bundler selected and why.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BundleSummary {
    pub per_pair: Vec<PairSummary>,
    pub excluded_collection_pages: u32,
    pub web_only_exception: bool,
    pub transcript_coverage: TranscriptCoverage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairSummary {
    pub platform: Platform,
    pub content_type: ContentType,
    pub eligible: u32,
    pub selected: u32,
    pub cap: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TranscriptCoverage {
    pub items_with_transcript: u32,
    pub total: u32,
    pub coverage_ratio: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_roundtrip() {
        for platform in Platform::ALL {
            assert_eq!(Platform::parse(platform.as_str()), Some(platform));
        }
    }

    #[test]
    fn test_actor_run_status_roundtrip() {
        for status in [
            ActorRunStatus::Running,
            ActorRunStatus::Succeeded,
            ActorRunStatus::Failed,
            ActorRunStatus::TimedOut,
            ActorRunStatus::Aborted,
        ] {
            assert_eq!(ActorRunStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_apify_timed_out_spelling_accepted() {
        // Apify reports "TIMED-OUT" on the wire; we store "TIMED_OUT".
        assert_eq!(
            ActorRunStatus::parse("TIMED-OUT"),
            Some(ActorRunStatus::TimedOut)
        );
    }

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(
            content_type_for(Platform::Instagram, Capability::Reels),
            Some(ContentType::Reel)
        );
        assert_eq!(
            content_type_for(Platform::Web, Capability::CrawlPages),
            Some(ContentType::WebPage)
        );
        assert_eq!(content_type_for(Platform::Web, Capability::Posts), None);
    }

    #[test]
    fn test_source_label_format() {
        assert_eq!(
            source_label(Platform::Linkedin, Capability::CompanyPosts),
            "linkedin.company_posts"
        );
    }

    #[test]
    fn test_evidence_status_serializes_all_buckets() {
        let status = EvidenceStatus::default();
        let json = serde_json::to_value(&status).unwrap();
        for key in ["reused", "refreshed", "skipped", "failed"] {
            assert!(json.get(key).is_some(), "missing bucket {key}");
        }
    }
}
