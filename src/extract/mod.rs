//! Per-platform cascades.
//!
//! Each extractor walks an ordered list of attempts and stops at the first one
//! that yields a usable count. Network attempts are awaited one after another;
//! the pure parsers applied to a response go through [`first_match`].

pub mod instagram;
pub mod naver_blog;
pub mod tiktok;
pub mod youtube;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ExtractionFailure;
use crate::models::{ExtractionOutcome, PlatformKind, PlatformStats};
use crate::normalize::normalize_count;
use crate::transport::{FetchRequest, FetchResponse, Transport};

pub use instagram::InstagramExtractor;
pub use naver_blog::NaverBlogExtractor;
pub use tiktok::TiktokExtractor;
pub use youtube::YoutubeExtractor;

// ==================== EXTRACTOR TRAIT ====================

#[async_trait]
pub trait PlatformExtractor: Send + Sync {
    fn platform(&self) -> PlatformKind;

    /// Reduce a free-text handle (`@name`, a profile URL, ...) to what the platform expects.
    fn normalize_handle(&self, raw: &str) -> String;

    /// Run the cascade for one handle. Never panics on bad input and never returns
    /// anything but a classified outcome.
    async fn extract(&self, handle: &str) -> ExtractionOutcome;
}

pub fn normalize_handle(platform: PlatformKind, raw: &str) -> String {
    match platform {
        PlatformKind::Instagram => instagram::normalize_username(raw),
        PlatformKind::Youtube => youtube::normalize_handle(raw),
        PlatformKind::Tiktok => tiktok::normalize_username(raw),
        PlatformKind::NaverBlog => naver_blog::normalize_blog_id(raw),
    }
}

/// One extractor per platform, all sharing `transport`.
pub fn default_extractors(
    transport: Arc<dyn Transport>,
    config: &Config,
) -> Vec<Arc<dyn PlatformExtractor>> {
    vec![
        Arc::new(InstagramExtractor::new(transport.clone(), config)) as Arc<dyn PlatformExtractor>,
        Arc::new(YoutubeExtractor::new(transport.clone(), config)),
        Arc::new(TiktokExtractor::new(transport.clone(), config)),
        Arc::new(NaverBlogExtractor::new(transport, config)),
    ]
}

// ==================== CANDIDATES ====================

/// A count recognized by one attempt, before it becomes [`PlatformStats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub followers: u64,
    pub following: Option<u64>,
    pub posts: Option<u64>,
    /// Which attempt produced it, for logs.
    pub source: &'static str,
    /// Read from a typed field rather than scraped text; zero is then a real answer.
    pub structured: bool,
}

impl Candidate {
    pub fn structured(source: &'static str, followers: u64) -> Self {
        Self {
            followers,
            following: None,
            posts: None,
            source,
            structured: true,
        }
    }

    pub fn loose(source: &'static str, followers: u64) -> Self {
        Self {
            structured: false,
            ..Self::structured(source, followers)
        }
    }

    pub fn with_following(mut self, following: Option<u64>) -> Self {
        self.following = following;
        self
    }

    pub fn with_posts(mut self, posts: Option<u64>) -> Self {
        self.posts = posts;
        self
    }

    /// Loose matches must be positive to stop a cascade.
    pub fn is_usable(&self) -> bool {
        self.structured || self.followers > 0
    }

    pub fn into_stats(self, platform: PlatformKind, username: &str) -> PlatformStats {
        PlatformStats::success(
            platform,
            username,
            self.followers,
            self.following,
            self.posts,
        )
    }
}

pub type Matcher<I> = fn(&I) -> Option<Candidate>;

/// Run `matchers` in order and return the first usable candidate.
pub fn first_match<I: ?Sized>(input: &I, matchers: &[Matcher<I>]) -> Option<Candidate> {
    matchers
        .iter()
        .filter_map(|matcher| matcher(input))
        .find(Candidate::is_usable)
}

/// Apply `patterns` in order to `body`; group 1 of the first hit is normalized.
pub fn first_count_match(
    body: &str,
    patterns: &[Regex],
    source: &'static str,
) -> Option<Candidate> {
    patterns
        .iter()
        .filter_map(|pattern| pattern.captures(body))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .map(|raw| Candidate::loose(source, normalize_count(&raw.replace(char::is_whitespace, ""))))
        .find(Candidate::is_usable)
}

// ==================== SHARED HELPERS ====================

/// Fetch and convert transport errors into classified failures.
pub(crate) async fn fetch(
    transport: &dyn Transport,
    request: FetchRequest,
) -> Result<FetchResponse, ExtractionFailure> {
    let url = request.url.clone();
    transport.fetch(request).await.map_err(|err| {
        warn!(%url, transport = transport.name(), error = %err, "network call failed");
        ExtractionFailure::transport(&err)
    })
}

/// Like [`fetch`] but also rejects non-2xx responses via the classifier.
pub(crate) async fn fetch_page(
    transport: &dyn Transport,
    request: FetchRequest,
) -> Result<FetchResponse, ExtractionFailure> {
    let resp = fetch(transport, request).await?;
    if !resp.is_success() {
        return Err(ExtractionFailure::status(resp.status, &resp.url));
    }
    Ok(resp)
}

/// Wrap a cascade with the logging every extractor shares.
pub(crate) async fn run_logged<F>(platform: PlatformKind, username: &str, cascade: F) -> ExtractionOutcome
where
    F: std::future::Future<Output = Result<PlatformStats, ExtractionFailure>>,
{
    let started = Instant::now();
    debug!(%platform, username, "extraction started");
    let outcome = ExtractionOutcome::from(cascade.await);
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        ExtractionOutcome::Success(stats) => info!(
            %platform,
            username,
            followers = stats.followers,
            elapsed_ms,
            "extraction succeeded"
        ),
        ExtractionOutcome::Failure(failure) => warn!(
            %platform,
            username,
            kind = %failure.kind,
            message = %failure.message,
            elapsed_ms,
            "extraction failed"
        ),
    }
    outcome
}

pub(crate) fn log_candidate(platform: PlatformKind, candidate: &Candidate) {
    debug!(
        %platform,
        source = candidate.source,
        followers = candidate.followers,
        structured = candidate.structured,
        "cascade attempt matched"
    );
}

pub(crate) fn log_fallthrough(platform: PlatformKind, attempt: &str) {
    debug!(%platform, attempt, "no usable signal, falling through");
}
