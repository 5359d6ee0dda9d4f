use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;

/// A single GET with per-call headers and timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn user_agent(self, value: &str) -> Self {
        self.header("User-Agent", value)
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// Where the body actually came from, after redirects.
    pub url: String,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport was released")]
    Released,

    #[error("request failed: {0}")]
    Other(String),
}

impl From<wreq::Error> for TransportError {
    fn from(err: wreq::Error) -> Self {
        if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Network access used by the extractors.
///
/// Implementations may be shared across concurrent extractions but must not carry
/// per-request state (cookies, headers) from one call into another.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError>;

    /// Mark the start of a batch of extractions. Every call is paired with one
    /// [`Transport::release`].
    async fn acquire(&self) {}

    /// Give back heavyweight resources once a batch of extractions is done.
    ///
    /// Batches may overlap; resources are only dropped when the last one ends.
    async fn release(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn name(&self) -> &str;
}

// ==================== WREQ TRANSPORT ====================

/// Plain HTTP transport emulating a desktop Chrome TLS fingerprint.
///
/// No cookie store is configured, so nothing set by one profile page reaches the next.
pub struct WreqTransport {
    client: wreq::Client,
    max_redirects: usize,
}

impl WreqTransport {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let client = wreq::Client::builder()
            .emulation(wreq_util::Emulation::Chrome131)
            .redirect(wreq::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            max_redirects: config.max_redirects,
        })
    }

    async fn fetch_following_redirects(
        &self,
        request: &FetchRequest,
    ) -> Result<FetchResponse, TransportError> {
        let mut current_url = request.url.clone();

        for _ in 0..=self.max_redirects {
            let mut builder = self.client.get(&current_url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            let resp = builder.send().await?;
            let code = resp.status().as_u16();

            // Follow 3xx by hand so the final URL is known to the caller.
            if (300..400).contains(&code) {
                let location = resp
                    .headers()
                    .get("location")
                    .and_then(|value| value.to_str().ok())
                    .map(|value| resolve_location(&current_url, value));

                if let Some(next_url) = location {
                    debug!(from = %current_url, to = %next_url, "following redirect");
                    current_url = next_url;
                    continue;
                }
                warn!(status = code, url = %current_url, "redirect without usable Location header");
            }

            let body = resp.text().await?;
            return Ok(FetchResponse {
                status: code,
                url: current_url,
                body,
            });
        }

        Err(TransportError::Other(format!(
            "exceeded {} redirects starting from {}",
            self.max_redirects, request.url
        )))
    }
}

fn resolve_location(current_url: &str, location: &str) -> String {
    match Url::parse(current_url).and_then(|base| base.join(location)) {
        Ok(url) => url.to_string(),
        Err(_) => location.to_string(),
    }
}

#[async_trait]
impl Transport for WreqTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        let started = Instant::now();
        let result = match timeout(request.timeout, self.fetch_following_redirects(&request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(request.timeout)),
        };

        match &result {
            Ok(resp) => debug!(
                url = %request.url,
                status = resp.status,
                bytes = resp.body.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "fetched"
            ),
            Err(err) => debug!(url = %request.url, error = %err, "fetch failed"),
        }
        result
    }

    fn name(&self) -> &str {
        "wreq"
    }
}
