//! Heavier transport that renders pages in headless Chromium.
//!
//! A Chromium profile directory is the browser instance here: it holds cookies and
//! cache, so it is created on the first fetch of a batch and thrown away when the
//! last overlapping batch calls [`Transport::release`].

use std::time::Instant;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::transport::{FetchRequest, FetchResponse, Transport, TransportError};

pub struct HeadlessTransport {
    chrome_bin: String,
    semaphore: Semaphore,
    profile: Mutex<ProfileState>,
}

#[derive(Default)]
struct ProfileState {
    dir: Option<TempDir>,
    /// Batches between `acquire` and `release`.
    active_batches: usize,
}

impl HeadlessTransport {
    pub fn new(config: &Config) -> Self {
        info!(
            chrome_bin = %config.chrome_bin,
            max_concurrent = config.max_browsers,
            "using headless chromium transport"
        );
        Self {
            chrome_bin: config.chrome_bin.clone(),
            semaphore: Semaphore::new(config.max_browsers),
            profile: Mutex::new(ProfileState::default()),
        }
    }

    /// Path of the current profile directory, creating one if the last was released.
    async fn acquire_profile(&self) -> Result<String, TransportError> {
        let mut profile = self.profile.lock().await;
        if profile.dir.is_none() {
            let dir = tempfile::Builder::new()
                .prefix("social-stats-chrome-")
                .tempdir()
                .map_err(|e| TransportError::Other(format!("failed to create profile dir: {e}")))?;
            debug!(path = %dir.path().display(), "acquired chromium profile");
            profile.dir = Some(dir);
        }
        profile
            .dir
            .as_ref()
            .map(|dir| dir.path().display().to_string())
            .ok_or(TransportError::Released)
    }

    pub async fn has_live_profile(&self) -> bool {
        self.profile.lock().await.dir.is_some()
    }
}

#[async_trait]
impl Transport for HeadlessTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        let parsed = url::Url::parse(&request.url)
            .map_err(|e| TransportError::Other(format!("invalid url {}: {e}", request.url)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(TransportError::Other(format!(
                "only http/https urls are allowed, got: {}",
                parsed.scheme()
            )));
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| TransportError::Released)?;
        let profile_dir = self.acquire_profile().await?;

        let mut args = vec![
            "--headless".to_string(),
            "--no-sandbox".to_string(),
            "--disable-gpu".to_string(),
            "--disable-dev-shm-usage".to_string(),
            format!("--user-data-dir={profile_dir}"),
        ];
        if let Some(ua) = request.header_value("User-Agent") {
            args.push(format!("--user-agent={ua}"));
        }
        let ignored = request
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("User-Agent"))
            .count();
        if ignored > 0 {
            debug!(url = %request.url, ignored, "chromium cannot send custom headers, dropping them");
        }
        args.push("--dump-dom".to_string());
        args.push(request.url.clone());

        let started = Instant::now();
        let output = tokio::time::timeout(
            request.timeout,
            tokio::process::Command::new(&self.chrome_bin)
                .args(&args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| TransportError::Timeout(request.timeout))?
        .map_err(|e| TransportError::Connect(format!("failed to launch {}: {e}", self.chrome_bin)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(url = %request.url, stderr = %stderr, "chromium exited with error");
            return Err(TransportError::Other(format!(
                "chromium exited with {}",
                output.status
            )));
        }

        let body = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(
            url = %request.url,
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rendered"
        );

        // A dumped DOM carries no HTTP status.
        Ok(FetchResponse {
            status: 200,
            url: request.url,
            body,
        })
    }

    async fn acquire(&self) {
        self.profile.lock().await.active_batches += 1;
    }

    async fn release(&self) -> Result<(), TransportError> {
        let released = {
            let mut profile = self.profile.lock().await;
            profile.active_batches = profile.active_batches.saturating_sub(1);
            if profile.active_batches > 0 {
                debug!(active_batches = profile.active_batches, "chromium profile still in use");
                return Ok(());
            }
            profile.dir.take()
        };
        if let Some(dir) = released {
            let path = dir.path().display().to_string();
            dir.close()
                .map_err(|e| TransportError::Other(format!("failed to remove {path}: {e}")))?;
            debug!(%path, "released chromium profile");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "headless-chromium"
    }
}
