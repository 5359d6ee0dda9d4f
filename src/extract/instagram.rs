use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{
    fetch, first_count_match, first_match, log_candidate, log_fallthrough, run_logged, Candidate,
    Matcher, PlatformExtractor,
};
use crate::config::{Config, INSTAGRAM_APP_UA, MOBILE_UA};
use crate::error::{ErrorKind, ExtractionFailure, FailureContext};
use crate::html_extractor::ProfilePage;
use crate::models::{ExtractionOutcome, PlatformKind, PlatformStats};
use crate::transport::{FetchRequest, Transport};

const PLATFORM: PlatformKind = PlatformKind::Instagram;

lazy_static! {
    static ref OG_FOLLOWER_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)^\s*([\d.,]+\s*[kmb]?)\s+Followers").expect("og followers regex"),
        Regex::new(r"팔로워\s*([\d.,]+\s*[만억]?)").expect("og korean followers regex"),
    ];
    static ref EDGE_FOLLOWED_BY: Regex =
        Regex::new(r#""edge_followed_by"\s*:\s*\{\s*"count"\s*:\s*(\d+)"#).expect("edge_followed_by regex");
    static ref EDGE_FOLLOW: Regex =
        Regex::new(r#""edge_follow"\s*:\s*\{\s*"count"\s*:\s*(\d+)"#).expect("edge_follow regex");
    static ref EDGE_MEDIA: Regex =
        Regex::new(r#""edge_owner_to_timeline_media"\s*:\s*\{\s*"count"\s*:\s*(\d+)"#)
            .expect("edge_owner_to_timeline_media regex");
}

pub fn normalize_username(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('@');
    let without_domain = match trimmed.find("instagram.com/") {
        Some(idx) => &trimmed[idx + "instagram.com/".len()..],
        None => trimmed,
    };
    without_domain
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .trim_start_matches('@')
        .to_string()
}

pub fn api_url(username: &str) -> String {
    format!(
        "https://i.instagram.com/api/v1/users/web_profile_info/?username={}",
        urlencoding::encode(username)
    )
}

pub fn profile_url(username: &str) -> String {
    format!("https://www.instagram.com/{username}/")
}

pub struct InstagramExtractor {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    app_id: String,
}

impl InstagramExtractor {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self {
            transport,
            timeout: config.request_timeout,
            app_id: config.instagram_app_id.clone(),
        }
    }

    async fn cascade(&self, username: &str) -> Result<PlatformStats, ExtractionFailure> {
        if username.is_empty() {
            return Err(ExtractionFailure::empty_handle("instagram"));
        }

        // Attempt 1: the app's private JSON endpoint.
        let api_request = FetchRequest::get(api_url(username), self.timeout)
            .user_agent(INSTAGRAM_APP_UA)
            .header("x-ig-app-id", self.app_id.as_str())
            .header("Accept", "application/json");
        match fetch(self.transport.as_ref(), api_request).await {
            Ok(resp) if resp.is_success() => {
                if let Some(candidate) = parse_api_response(&resp.body) {
                    log_candidate(PLATFORM, &candidate);
                    return Ok(candidate.into_stats(PLATFORM, username));
                }
                log_fallthrough(PLATFORM, "web_profile_info");
            }
            Ok(resp) => {
                debug!(status = resp.status, "web_profile_info rejected the request");
                log_fallthrough(PLATFORM, "web_profile_info");
            }
            Err(failure) if failure.kind == ErrorKind::Timeout => return Err(failure),
            Err(_) => log_fallthrough(PLATFORM, "web_profile_info"),
        }

        // Attempt 2: the public profile page.
        let page_request = FetchRequest::get(profile_url(username), self.timeout).user_agent(MOBILE_UA);
        let resp = fetch(self.transport.as_ref(), page_request).await?;
        if !resp.is_success() {
            return Err(ExtractionFailure::status(resp.status, &resp.url));
        }
        if resp.url.contains("/accounts/login") {
            return Err(ExtractionFailure::from_context(
                FailureContext::LoginWall,
                format!("redirected to login for {username}"),
            ));
        }

        let page = ProfilePage::from(resp);
        let matchers: [Matcher<ProfilePage>; 2] = [from_og_description, from_embedded_edges];
        if let Some(candidate) = first_match(&page, &matchers) {
            log_candidate(PLATFORM, &candidate);
            return Ok(candidate.into_stats(PLATFORM, username));
        }

        if page.signals.has_login_form {
            return Err(ExtractionFailure::from_context(
                FailureContext::LoginWall,
                format!("login wall instead of profile for {username}"),
            ));
        }
        Err(ExtractionFailure::exhausted(format!(
            "no follower count found for instagram user {username}"
        )))
    }
}

#[async_trait]
impl PlatformExtractor for InstagramExtractor {
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

fn edge_count(user: &Value, edge: &str) -> Option<u64> {
    user.get(edge)?.get("count")?.as_u64()
}

/// Read the follower edge from the JSON API body.
fn parse_api_response(body: &str) -> Option<Candidate> {
    let json: Value = serde_json::from_str(body).ok()?;
    let user = json.pointer("/data/user")?;
    let followers = edge_count(user, "edge_followed_by")?;
    Some(
        Candidate::structured("web_profile_info", followers)
            .with_following(edge_count(user, "edge_follow"))
            .with_posts(edge_count(user, "edge_owner_to_timeline_media")),
    )
}

/// `og:description` reads "<n> Followers, <n> Following, <n> Posts - ...".
fn from_og_description(page: &ProfilePage) -> Option<Candidate> {
    let description = page.signals.meta_content("og:description")?;
    first_count_match(description, &OG_FOLLOWER_PATTERNS, "og:description")
}

fn capture_u64(pattern: &Regex, body: &str) -> Option<u64> {
    pattern.captures(body)?.get(1)?.as_str().parse().ok()
}

/// Embedded page JSON carries the edge counts as plain integers.
fn from_embedded_edges(page: &ProfilePage) -> Option<Candidate> {
    let followers = capture_u64(&EDGE_FOLLOWED_BY, &page.body)?;
    Some(
        Candidate::structured("edge_followed_by", followers)
            .with_following(capture_u64(&EDGE_FOLLOW, &page.body))
            .with_posts(capture_u64(&EDGE_MEDIA, &page.body)),
    )
}
