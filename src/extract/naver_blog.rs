use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use super::{fetch_page, first_count_match, log_candidate, log_fallthrough, run_logged, PlatformExtractor};
use crate::config::Config;
use crate::error::ExtractionFailure;
use crate::html_extractor::ProfilePage;
use crate::models::{ExtractionOutcome, PlatformKind, PlatformStats};
use crate::transport::{FetchRequest, Transport};

const PLATFORM: PlatformKind = PlatformKind::NaverBlog;
const BLOG_BASE: &str = "https://blog.naver.com/";
const MAIN_FRAME_ID: &str = "mainFrame";

lazy_static! {
    /// 이웃 ("neighbor") counts in the serializations seen on blog pages.
    static ref NEIGHBOR_PATTERNS: Vec<Regex> = vec![
        Regex::new(r#""buddyCnt"\s*:\s*"?([\d,]+)"#).expect("buddyCnt regex"),
        Regex::new(r#""buddyCount"\s*:\s*"?([\d,]+)"#).expect("buddyCount regex"),
        Regex::new(r"이웃\s*수?\s*(?:<[^>]*>\s*)+([\d,]+)").expect("tagged neighbor regex"),
        Regex::new(r"이웃\s*수?\s*[:：]?\s*([\d,]+)\s*명?").expect("inline neighbor regex"),
    ];
    static ref BLOG_ID_PARAM: Regex = Regex::new(r"[?&]blogId=([A-Za-z0-9_-]+)").expect("blogId regex");
}

/// Pull the blog id out of `blog.naver.com/<id>`, `m.blog.naver.com/<id>`,
/// `...?blogId=<id>` or a bare id.
pub fn normalize_blog_id(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('@');

    if let Some(caps) = BLOG_ID_PARAM.captures(trimmed) {
        return caps[1].to_string();
    }
    let path = match trimmed.find("blog.naver.com/") {
        Some(idx) => &trimmed[idx + "blog.naver.com/".len()..],
        None => trimmed,
    };
    path.split(['/', '?', '#']).next().unwrap_or("").to_string()
}

pub fn blog_url(blog_id: &str) -> String {
    format!("{BLOG_BASE}{blog_id}")
}

pub struct NaverBlogExtractor {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl NaverBlogExtractor {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self {
            transport,
            timeout: config.request_timeout,
        }
    }

    fn request(&self, url: &str) -> FetchRequest {
        FetchRequest::get(url, self.timeout).header("Referer", BLOG_BASE)
    }

    async fn cascade(&self, blog_id: &str) -> Result<PlatformStats, ExtractionFailure> {
        if blog_id.is_empty() {
            return Err(ExtractionFailure::empty_handle("naver blog"));
        }

        let url = blog_url(blog_id);
        let page = ProfilePage::from(fetch_page(self.transport.as_ref(), self.request(&url)).await?);
        if let Some(candidate) = first_count_match(&page.body, &NEIGHBOR_PATTERNS, "blog_page") {
            log_candidate(PLATFORM, &candidate);
            return Ok(candidate.into_stats(PLATFORM, blog_id));
        }
        log_fallthrough(PLATFORM, "blog_page");

        // The visible blog lives in a nested document.
        let Some(frame_url) = main_frame_url(&page) else {
            return Err(ExtractionFailure::exhausted(format!(
                "no neighbor count and no main frame for blog {blog_id}"
            )));
        };
        let frame = fetch_page(self.transport.as_ref(), self.request(&frame_url)).await?;
        match first_count_match(&frame.body, &NEIGHBOR_PATTERNS, "main_frame") {
            Some(candidate) => {
                log_candidate(PLATFORM, &candidate);
                Ok(candidate.into_stats(PLATFORM, blog_id))
            }
            None => Err(ExtractionFailure::exhausted(format!(
                "no neighbor count found for blog {blog_id}"
            ))),
        }
    }
}

fn main_frame_url(page: &ProfilePage) -> Option<String> {
    let src = page.signals.iframe_src(MAIN_FRAME_ID).or_else(|| {
        page.signals
            .iframes
            .iter()
            .map(|(_, src)| src.as_str())
            .find(|src| src.contains("PostList") || src.contains("blogId="))
    })?;
    let base = Url::parse(&page.url).or_else(|_| Url::parse(BLOG_BASE)).ok()?;
    base.join(src).ok().map(|url| url.to_string())
}

#[async_trait]
impl PlatformExtractor for NaverBlogExtractor {
    fn platform(&self) -> PlatformKind {
        PLATFORM
    }

    fn normalize_handle(&self, raw: &str) -> String {
        normalize_blog_id(raw)
    }

    async fn extract(&self, handle: &str) -> ExtractionOutcome {
        let blog_id = normalize_blog_id(handle);
        run_logged(PLATFORM, &blog_id, self.cascade(&blog_id)).await
    }
}
