// Test doubles for the transport boundary.
//
// MockTransport maps exact URLs to canned responses or transport errors, records
// every request it sees and counts release() calls. Unregistered URLs fail like a
// refused connection, so a cascade that wanders off the expected path shows up as
// a NETWORK_ERROR instead of silently passing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::AggregateAccountState;
use crate::store::{AccountStore, StoreError};
use crate::transport::{FetchRequest, FetchResponse, Transport, TransportError};

#[derive(Debug, Clone)]
enum MockRoute {
    Respond {
        status: u16,
        final_url: Option<String>,
        body: String,
        delay: Option<Duration>,
    },
    Fail {
        error: TransportError,
        delay: Option<Duration>,
    },
}

#[derive(Default)]
pub struct MockTransport {
    routes: HashMap<String, MockRoute>,
    requests: Mutex<Vec<FetchRequest>>,
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_page(self, url: &str, body: &str) -> Self {
        self.on_status(url, 200, body)
    }

    pub fn on_status(mut self, url: &str, status: u16, body: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            MockRoute::Respond {
                status,
                final_url: None,
                body: body.to_string(),
                delay: None,
            },
        );
        self
    }

    /// Respond as if `url` had redirected to `final_url`.
    pub fn on_redirected(mut self, url: &str, final_url: &str, body: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            MockRoute::Respond {
                status: 200,
                final_url: Some(final_url.to_string()),
                body: body.to_string(),
                delay: None,
            },
        );
        self
    }

    pub fn on_delayed_page(mut self, url: &str, delay: Duration, body: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            MockRoute::Respond {
                status: 200,
                final_url: None,
                body: body.to_string(),
                delay: Some(delay),
            },
        );
        self
    }

    pub fn on_error(mut self, url: &str, error: TransportError) -> Self {
        self.routes.insert(url.to_string(), MockRoute::Fail { error, delay: None });
        self
    }

    pub fn on_delayed_error(mut self, url: &str, delay: Duration, error: TransportError) -> Self {
        self.routes.insert(
            url.to_string(),
            MockRoute::Fail {
                error,
                delay: Some(delay),
            },
        );
        self
    }

    pub fn on_timeout(self, url: &str) -> Self {
        self.on_error(url, TransportError::Timeout(Duration::from_secs(10)))
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|request| request.url).collect()
    }

    pub fn was_requested(&self, url: &str) -> bool {
        self.requested_urls().iter().any(|requested| requested == url)
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let route = self.routes.get(&request.url).cloned().ok_or_else(|| {
            TransportError::Connect(format!("MockTransport: no route registered for {}", request.url))
        })?;

        match route {
            MockRoute::Respond {
                status,
                final_url,
                body,
                delay,
            } => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(FetchResponse {
                    status,
                    url: final_url.unwrap_or(request.url),
                    body,
                })
            }
            MockRoute::Fail { error, delay } => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Err(error)
            }
        }
    }

    async fn acquire(&self) {
        self.acquires.fetch_add(1, Ordering::SeqCst);
    }

    async fn release(&self) -> Result<(), TransportError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A store whose backend is down: every call fails.
pub struct UnavailableStore;

#[async_trait]
impl AccountStore for UnavailableStore {
    async fn load(&self, _account_id: &str) -> Result<AggregateAccountState, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn save(&self, _account_id: &str, _state: &AggregateAccountState) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

// ==================== FIXTURES ====================

/// A TikTok profile page carrying the rehydration blob.
pub fn tiktok_profile_html(followers: u64, following: u64, videos: u64) -> String {
    format!(
        r#"<!DOCTYPE html><html><head><title>TikTok</title></head><body>
<script id="__UNIVERSAL_DATA_FOR_REHYDRATION__" type="application/json">{{"__DEFAULT_SCOPE__":{{"webapp.user-detail":{{"statusCode":0,"userInfo":{{"user":{{"uniqueId":"sample"}},"stats":{{"followerCount":{followers},"followingCount":{following},"heartCount":1,"videoCount":{videos}}}}}}}}}}}</script>
</body></html>"#
    )
}

/// The JSON the Instagram web profile API returns.
pub fn instagram_api_json(followers: u64, following: u64, posts: u64) -> String {
    format!(
        r#"{{"data":{{"user":{{"username":"sample","edge_followed_by":{{"count":{followers}}},"edge_follow":{{"count":{following}}},"edge_owner_to_timeline_media":{{"count":{posts}}}}}}},"status":"ok"}}"#
    )
}
