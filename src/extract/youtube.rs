use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

use super::{
    fetch_page, first_count_match, first_match, log_candidate, run_logged, Candidate,
    Matcher, PlatformExtractor,
};
use crate::config::Config;
use crate::error::ExtractionFailure;
use crate::html_extractor::ProfilePage;
use crate::models::{ExtractionOutcome, PlatformKind, PlatformStats};
use crate::transport::{FetchRequest, Transport};

const PLATFORM: PlatformKind = PlatformKind::Youtube;
const CHANNEL_BASE: &str = "https://www.youtube.com/";

lazy_static! {
    /// Loosest last; each targets a different serialization of the subscriber count.
    static ref SUBSCRIBER_PATTERNS: Vec<Regex> = vec![
        // Up to two levels of nesting; never leaves the subscriberCountText object.
        Regex::new(r#""subscriberCountText"\s*:\s*\{(?:[^{}]|\{[^{}]*\}|\{[^{}]*\{[^{}]*\}[^{}]*\})*?"simpleText"\s*:\s*"([\d.,]+\s*[KMBkmb]?)"#)
            .expect("simpleText regex"),
        Regex::new(r#""subscriberCountText"\s*:\s*"([\d.,]+\s*[KMBkmb]?)"#).expect("subscriberCountText regex"),
        Regex::new(r#""subscriberCount"\s*:\s*"?(\d+)"#).expect("subscriberCount regex"),
        Regex::new(r"(?i)([\d.,]+\s*[kmb]?)\s+subscribers").expect("loose subscribers regex"),
    ];
}

/// Reduce free text to the channel path segment, preferring the `@handle` form.
pub fn normalize_handle(raw: &str) -> String {
    let trimmed = raw.trim();
    let path = match trimmed.find("youtube.com/") {
        Some(idx) => &trimmed[idx + "youtube.com/".len()..],
        None => trimmed,
    };
    let path = path.split(['?', '#']).next().unwrap_or("").trim_end_matches('/');

    // Legacy channel URLs have no @ form and are kept as-is.
    if path.starts_with("channel/") || path.starts_with("c/") || path.starts_with("user/") {
        return path.to_string();
    }

    let name = path
        .split('/')
        .next()
        .unwrap_or("")
        .trim_start_matches('@');
    if name.is_empty() {
        return String::new();
    }
    format!("@{name}")
}

pub fn channel_url(handle: &str) -> String {
    format!("{CHANNEL_BASE}{handle}")
}

pub struct YoutubeExtractor {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl YoutubeExtractor {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self {
            transport,
            timeout: config.request_timeout,
        }
    }

    async fn cascade(&self, handle: &str) -> Result<PlatformStats, ExtractionFailure> {
        if handle.is_empty() {
            return Err(ExtractionFailure::empty_handle("youtube"));
        }

        let request = FetchRequest::get(channel_url(handle), self.timeout)
            .header("Accept-Language", "en-US,en;q=0.9");
        let page = ProfilePage::from(fetch_page(self.transport.as_ref(), request).await?);

        let matchers: [Matcher<ProfilePage>; 2] = [from_subscriber_patterns, from_interaction_count];
        match first_match(&page, &matchers) {
            Some(candidate) => {
                log_candidate(PLATFORM, &candidate);
                Ok(candidate.into_stats(PLATFORM, handle))
            }
            None => Err(ExtractionFailure::exhausted(format!(
                "no subscriber count found for youtube channel {handle}"
            ))),
        }
    }
}

#[async_trait]
impl PlatformExtractor for YoutubeExtractor {
    fn platform(&self) -> PlatformKind {
        PLATFORM
    }

    fn normalize_handle(&self, raw: &str) -> String {
        normalize_handle(raw)
    }

    async fn extract(&self, handle: &str) -> ExtractionOutcome {
        let handle = normalize_handle(handle);
        run_logged(PLATFORM, &handle, self.cascade(&handle)).await
    }
}

fn from_subscriber_patterns(page: &ProfilePage) -> Option<Candidate> {
    first_count_match(&page.body, &SUBSCRIBER_PATTERNS, "subscriber_text")
}

/// `<meta itemprop="interactionCount">` is a plain integer.
fn from_interaction_count(page: &ProfilePage) -> Option<Candidate> {
    let count = page
        .signals
        .meta_content("interactionCount")?
        .trim()
        .parse::<u64>()
        .ok()?;
    Some(Candidate::structured("interactionCount", count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::MockTransport;

    async fn run(url: &str, body: &str, handle: &str) -> ExtractionOutcome {
        let transport = Arc::new(MockTransport::new().on_page(url, body));
        YoutubeExtractor::new(transport, &Config::default())
            .extract(handle)
            .await
    }

    fn followers(outcome: &ExtractionOutcome) -> Option<u64> {
        match outcome {
            ExtractionOutcome::Success(stats) => stats.followers,
            ExtractionOutcome::Failure(_) => None,
        }
    }

    #[test]
    fn handles_prefer_the_at_form() {
        assert_eq!(normalize_handle("sample"), "@sample");
        assert_eq!(normalize_handle("@sample"), "@sample");
        assert_eq!(normalize_handle("https://www.youtube.com/@sample/videos?x=1"), "@sample");
        assert_eq!(normalize_handle("youtube.com/sample"), "@sample");
        assert_eq!(
            normalize_handle("https://youtube.com/channel/UC123abc"),
            "channel/UC123abc"
        );
        assert_eq!(normalize_handle("  "), "");
    }

    #[tokio::test]
    async fn simple_text_serialization() {
        let body = r#"{"subscriberCountText":{"accessibility":{"accessibilityData":{"label":"1.23 million subscribers"}},"simpleText":"1.23M subscribers"}}"#;
        let outcome = run("https://www.youtube.com/@sample", body, "sample").await;
        assert_eq!(followers(&outcome), Some(1_230_000));
    }

    #[tokio::test]
    async fn simple_text_outside_the_subscriber_object_is_ignored() {
        let body = r#"{"subscriberCountText":{"accessibility":{"accessibilityData":{"label":"hidden"}}},"publishedTimeText":{"simpleText":"3 years ago"},"subscriberCount":"812"}"#;
        let outcome = run("https://www.youtube.com/@sample", body, "@sample").await;
        assert_eq!(followers(&outcome), Some(812));
    }

    #[tokio::test]
    async fn alternate_key_serializations() {
        let body = r#"{"subscriberCountText":"45.6K subscribers"}"#;
        let outcome = run("https://www.youtube.com/@sample", body, "@sample").await;
        assert_eq!(followers(&outcome), Some(45_600));

        let body = r#"{"subscriberCount":"7890"}"#;
        let outcome = run("https://www.youtube.com/@sample", body, "@sample").await;
        assert_eq!(followers(&outcome), Some(7_890));
    }

    #[tokio::test]
    async fn loose_text_match() {
        let body = "<div>Sample Channel · 2.5K Subscribers · 120 videos</div>";
        let outcome = run("https://www.youtube.com/@sample", body, "@sample").await;
        assert_eq!(followers(&outcome), Some(2_500));
    }

    #[tokio::test]
    async fn interaction_count_meta_is_the_last_resort() {
        let body = r#"<html><head><meta itemprop="interactionCount" content="31337"></head></html>"#;
        let outcome = run("https://www.youtube.com/@sample", body, "@sample").await;
        assert_eq!(followers(&outcome), Some(31_337));
    }

    #[tokio::test]
    async fn exhaustion_is_a_parse_error() {
        let outcome = run("https://www.youtube.com/@sample", "<html></html>", "@sample").await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ParseError));
    }

    #[tokio::test]
    async fn missing_channel_is_user_not_found() {
        let transport = Arc::new(MockTransport::new().on_status(
            "https://www.youtube.com/@ghost",
            404,
            "",
        ));
        let outcome = YoutubeExtractor::new(transport, &Config::default())
            .extract("ghost")
            .await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::UserNotFound));
    }
}
