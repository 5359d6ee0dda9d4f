use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ExtractionFailure, UnknownPlatform};

// ==================== PLATFORMS ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    Instagram,
    Youtube,
    Tiktok,
    NaverBlog,
}

impl PlatformKind {
    pub const ALL: [PlatformKind; 4] = [
        PlatformKind::Instagram,
        PlatformKind::Youtube,
        PlatformKind::Tiktok,
        PlatformKind::NaverBlog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Instagram => "instagram",
            PlatformKind::Youtube => "youtube",
            PlatformKind::Tiktok => "tiktok",
            PlatformKind::NaverBlog => "naver_blog",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "instagram" => Ok(PlatformKind::Instagram),
            "youtube" => Ok(PlatformKind::Youtube),
            "tiktok" => Ok(PlatformKind::Tiktok),
            "naver_blog" | "naverblog" | "naver" | "blog" => Ok(PlatformKind::NaverBlog),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

/// A caller-supplied `(platform, handle)` pair. The handle is free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentifier {
    pub platform: PlatformKind,
    pub handle: String,
}

impl AccountIdentifier {
    pub fn new(platform: PlatformKind, handle: impl Into<String>) -> Self {
        Self {
            platform,
            handle: handle.into(),
        }
    }

    /// The handle in the form the platform's extractor requests it.
    pub fn normalized_handle(&self) -> String {
        crate::extract::normalize_handle(self.platform, &self.handle)
    }
}

// ==================== STATS ====================

/// One platform's follower snapshot.
///
/// Either `followers` is present and `error_code` is not, or the reverse. The two
/// constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub followers: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub following: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posts: Option<u64>,
    pub platform: PlatformKind,
    pub username: String,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorKind>,
}

impl PlatformStats {
    pub fn success(
        platform: PlatformKind,
        username: impl Into<String>,
        followers: u64,
        following: Option<u64>,
        posts: Option<u64>,
    ) -> Self {
        Self {
            followers: Some(followers),
            following,
            posts,
            platform,
            username: username.into(),
            last_updated: Utc::now(),
            error: None,
            error_code: None,
        }
    }

    pub fn failed(
        platform: PlatformKind,
        username: impl Into<String>,
        failure: &ExtractionFailure,
    ) -> Self {
        Self {
            followers: None,
            following: None,
            posts: None,
            platform,
            username: username.into(),
            last_updated: Utc::now(),
            error: Some(failure.message.clone()),
            error_code: Some(failure.kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.followers.is_some() && self.error_code.is_none()
    }

    /// Followers counted toward an aggregate; unknown counts contribute nothing.
    pub fn known_followers(&self) -> u64 {
        if self.is_success() {
            self.followers.unwrap_or(0)
        } else {
            0
        }
    }
}

/// Result of one extraction call. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Success(PlatformStats),
    Failure(ExtractionFailure),
}

impl ExtractionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionOutcome::Success(_))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ExtractionOutcome::Success(_) => None,
            ExtractionOutcome::Failure(failure) => Some(failure.kind),
        }
    }

    /// Flatten into the persisted shape, using `username` for failures.
    pub fn into_stats(self, platform: PlatformKind, username: &str) -> PlatformStats {
        match self {
            ExtractionOutcome::Success(stats) => stats,
            ExtractionOutcome::Failure(failure) => {
                PlatformStats::failed(platform, username, &failure)
            }
        }
    }
}

impl From<Result<PlatformStats, ExtractionFailure>> for ExtractionOutcome {
    fn from(result: Result<PlatformStats, ExtractionFailure>) -> Self {
        match result {
            Ok(stats) => ExtractionOutcome::Success(stats),
            Err(failure) => ExtractionOutcome::Failure(failure),
        }
    }
}

// ==================== AGGREGATE ====================

/// Per-account merge target owned by the persistence layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateAccountState {
    pub platforms: BTreeMap<PlatformKind, PlatformStats>,
    /// Platforms whose latest refresh failed while an older count was kept.
    #[serde(default)]
    pub stale: BTreeSet<PlatformKind>,
    pub total_followers: u64,
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl AggregateAccountState {
    pub fn get(&self, platform: PlatformKind) -> Option<&PlatformStats> {
        self.platforms.get(&platform)
    }

    pub fn followers(&self, platform: PlatformKind) -> Option<u64> {
        self.get(platform).and_then(|stats| stats.followers)
    }

    pub fn is_stale(&self, platform: PlatformKind) -> bool {
        self.stale.contains(&platform)
    }

    /// Connected platforms and the handle each was connected with.
    pub fn connections(&self) -> BTreeMap<PlatformKind, String> {
        self.platforms
            .iter()
            .map(|(platform, stats)| (*platform, stats.username.clone()))
            .collect()
    }

    pub fn recompute_total(&mut self) -> u64 {
        self.total_followers = self
            .platforms
            .values()
            .map(PlatformStats::known_followers)
            .fold(0u64, u64::saturating_add);
        self.total_followers
    }
}
