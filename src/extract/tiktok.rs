use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{
    fetch_page, first_count_match, first_match, log_candidate, run_logged, Candidate,
    Matcher, PlatformExtractor,
};
use crate::config::{Config, MOBILE_UA};
use crate::error::{ExtractionFailure, FailureContext};
use crate::html_extractor::ProfilePage;
use crate::models::{ExtractionOutcome, PlatformKind, PlatformStats};
use crate::transport::{FetchRequest, Transport};

const PLATFORM: PlatformKind = PlatformKind::Tiktok;
const REHYDRATION_SCRIPT_ID: &str = "__UNIVERSAL_DATA_FOR_REHYDRATION__";

/// `webapp.user-detail.statusCode` values for missing or banned accounts.
const MISSING_ACCOUNT_CODES: [i64; 2] = [10202, 10221];

lazy_static! {
    static ref FOLLOWER_PATTERNS: Vec<Regex> = vec![
        Regex::new(r#""followerCount"\s*:\s*(\d+)"#).expect("followerCount regex"),
        Regex::new(r#""follower_count"\s*:\s*(\d+)"#).expect("follower_count regex"),
        Regex::new(r"(?i)([\d.,]+\s*[kmb]?)\s*Followers").expect("loose followers regex"),
    ];
}

pub fn normalize_username(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_domain = match trimmed.find("tiktok.com/") {
        Some(idx) => &trimmed[idx + "tiktok.com/".len()..],
        None => trimmed,
    };
    without_domain
        .trim_start_matches('@')
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .to_string()
}

pub fn profile_url(username: &str) -> String {
    format!("https://www.tiktok.com/@{username}")
}

// ==================== REHYDRATION BLOB ====================

#[derive(Debug, Deserialize)]
struct Rehydration {
    #[serde(rename = "__DEFAULT_SCOPE__")]
    default_scope: DefaultScope,
}

#[derive(Debug, Deserialize)]
struct DefaultScope {
    #[serde(rename = "webapp.user-detail")]
    user_detail: Option<UserDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDetail {
    #[serde(default)]
    status_code: i64,
    user_info: Option<UserInfo>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    stats: Option<UserStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserStats {
    follower_count: u64,
    following_count: Option<u64>,
    video_count: Option<u64>,
}

fn user_detail(page: &ProfilePage) -> Option<UserDetail> {
    let script = page.signals.script_by_id(REHYDRATION_SCRIPT_ID)?;
    match serde_json::from_str::<Rehydration>(script) {
        Ok(blob) => blob.default_scope.user_detail,
        Err(err) => {
            debug!(error = %err, "rehydration script did not parse");
            None
        }
    }
}

/// All three counts in one shot when the nested path is present.
fn from_rehydration(page: &ProfilePage) -> Option<Candidate> {
    let stats = user_detail(page)?.user_info?.stats?;
    Some(
        Candidate::structured("rehydration", stats.follower_count)
            .with_following(stats.following_count)
            .with_posts(stats.video_count),
    )
}

fn from_follower_patterns(page: &ProfilePage) -> Option<Candidate> {
    first_count_match(&page.body, &FOLLOWER_PATTERNS, "follower_text")
}

// ==================== EXTRACTOR ====================

pub struct TiktokExtractor {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl TiktokExtractor {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self {
            transport,
            timeout: config.request_timeout,
        }
    }

    async fn cascade(&self, username: &str) -> Result<PlatformStats, ExtractionFailure> {
        if username.is_empty() {
            return Err(ExtractionFailure::empty_handle("tiktok"));
        }

        let request = FetchRequest::get(profile_url(username), self.timeout).user_agent(MOBILE_UA);
        let page = ProfilePage::from(fetch_page(self.transport.as_ref(), request).await?);

        let matchers: [Matcher<ProfilePage>; 2] = [from_rehydration, from_follower_patterns];
        if let Some(candidate) = first_match(&page, &matchers) {
            log_candidate(PLATFORM, &candidate);
            return Ok(candidate.into_stats(PLATFORM, username));
        }

        if let Some(detail) = user_detail(&page) {
            if MISSING_ACCOUNT_CODES.contains(&detail.status_code) {
                return Err(ExtractionFailure::from_context(
                    FailureContext::AccountMissing,
                    format!("tiktok reports status {} for {username}", detail.status_code),
                ));
            }
        }
        Err(ExtractionFailure::exhausted(format!(
            "no follower count found for tiktok user {username}"
        )))
    }
}

#[async_trait]
impl PlatformExtractor for TiktokExtractor {
    fn platform(&self) -> PlatformKind {
        PLATFORM
    }

    fn normalize_handle(&self, raw: &str) -> String {
        normalize_username(raw)
    }

    async fn extract(&self, handle: &str) -> ExtractionOutcome {
        let username = normalize_username(handle);
        run_logged(PLATFORM, &username, self.cascade(&username)).await
    }
}
