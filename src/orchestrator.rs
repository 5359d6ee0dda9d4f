use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{ExtractionFailure, FailureContext};
use crate::extract::{default_extractors, PlatformExtractor};
use crate::models::{ExtractionOutcome, PlatformKind};
use crate::transport::Transport;

/// Requested handles for one account, keyed by platform.
pub type AccountHandles = BTreeMap<PlatformKind, String>;

/// Runs the requested extractors side by side and waits for every one to settle.
pub struct FetchOrchestrator {
    transport: Arc<dyn Transport>,
    extractors: HashMap<PlatformKind, Arc<dyn PlatformExtractor>>,
}

impl FetchOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        let extractors = default_extractors(transport.clone(), config);
        Self::with_extractors(transport, extractors)
    }

    pub fn with_extractors(
        transport: Arc<dyn Transport>,
        extractors: Vec<Arc<dyn PlatformExtractor>>,
    ) -> Self {
        let extractors = extractors
            .into_iter()
            .map(|extractor| (extractor.platform(), extractor))
            .collect();
        Self {
            transport,
            extractors,
        }
    }

    /// One outcome per requested platform with a non-blank handle, none for the rest.
    ///
    /// A failing or panicking extractor never cancels or delays the others. The
    /// transport is held for the whole batch and released once it has settled.
    pub async fn fetch_all(
        &self,
        accounts: &AccountHandles,
    ) -> BTreeMap<PlatformKind, ExtractionOutcome> {
        let started = Instant::now();
        self.transport.acquire().await;
        let mut handles = Vec::new();

        for (platform, handle) in accounts {
            if handle.trim().is_empty() {
                continue;
            }
            let platform = *platform;
            let Some(extractor) = self.extractors.get(&platform).cloned() else {
                error!(%platform, "no extractor registered");
                handles.push((platform, None));
                continue;
            };
            let handle = handle.clone();
            handles.push((
                platform,
                Some(tokio::spawn(async move { extractor.extract(&handle).await })),
            ));
        }

        let (platforms, tasks): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let settled = join_all(tasks.into_iter().map(|task| async move {
            match task {
                Some(task) => Some(task.await),
                None => None,
            }
        }))
        .await;

        let results: BTreeMap<PlatformKind, ExtractionOutcome> = platforms
            .into_iter()
            .zip(settled)
            .map(|(platform, joined)| {
                let outcome = match joined {
                    Some(Ok(outcome)) => outcome,
                    Some(Err(join_err)) => {
                        error!(%platform, error = %join_err, "extraction task aborted");
                        ExtractionOutcome::Failure(ExtractionFailure::from_context(
                            FailureContext::TaskAborted,
                            format!("extraction task aborted: {join_err}"),
                        ))
                    }
                    None => ExtractionOutcome::Failure(ExtractionFailure::from_context(
                        FailureContext::NoExtractor,
                        format!("no extractor registered for {platform}"),
                    )),
                };
                (platform, outcome)
            })
            .collect();

        if let Err(err) = self.transport.release().await {
            warn!(transport = self.transport.name(), error = %err, "failed to release transport");
        }

        let succeeded = results.values().filter(|outcome| outcome.is_success()).count();
        info!(
            requested = results.len(),
            succeeded,
            failed = results.len() - succeeded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetch batch settled"
        );
        results
    }

    pub async fn fetch_one(&self, platform: PlatformKind, handle: &str) -> ExtractionOutcome {
        let accounts = AccountHandles::from([(platform, handle.to_string())]);
        self.fetch_all(&accounts)
            .await
            .remove(&platform)
            .unwrap_or_else(|| {
                ExtractionOutcome::Failure(ExtractionFailure::empty_handle(platform.as_str()))
            })
    }
}
