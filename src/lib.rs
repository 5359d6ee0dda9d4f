//! Follower, subscriber and neighbor counts for Instagram, YouTube, TikTok and
//! Naver Blog profiles, scraped without official APIs.
//!
//! [`FetchOrchestrator`] fans a set of handles out to the per-platform extractors
//! and waits for all of them. [`RefreshCoordinator`] merges those outcomes into a
//! stored [`AggregateAccountState`], keeping the last known count when a refresh
//! fails.

pub mod config;
pub mod error;
pub mod extract;
pub mod headless;
pub mod html_extractor;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod refresh;
pub mod store;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

use std::sync::Arc;

use tracing::info;

pub use crate::config::{Config, Engine};
pub use crate::error::{ErrorKind, ExtractionFailure, FailureContext};
pub use crate::extract::PlatformExtractor;
pub use crate::headless::HeadlessTransport;
pub use crate::models::{
    AccountIdentifier, AggregateAccountState, ExtractionOutcome, PlatformKind, PlatformStats,
};
pub use crate::normalize::normalize_count;
pub use crate::orchestrator::{AccountHandles, FetchOrchestrator};
pub use crate::refresh::{RefreshCoordinator, RefreshError, RefreshReport};
pub use crate::store::{AccountStore, MemoryAccountStore, StoreError};
pub use crate::transport::{Transport, TransportError, WreqTransport};

/// The transport selected by `config.engine`.
pub fn build_transport(config: &Config) -> Result<Arc<dyn Transport>, TransportError> {
    let transport: Arc<dyn Transport> = match config.engine {
        Engine::Lite => Arc::new(WreqTransport::new(config)?),
        Engine::Headless => Arc::new(HeadlessTransport::new(config)),
    };
    info!(transport = transport.name(), timeout_secs = config.request_timeout.as_secs(), "transport ready");
    Ok(transport)
}

/// An orchestrator wired with every platform extractor over the configured transport.
pub fn build_orchestrator(config: &Config) -> Result<FetchOrchestrator, TransportError> {
    let transport = build_transport(config)?;
    Ok(FetchOrchestrator::new(transport, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_engine_selects_the_browser_transport() {
        let config = Config {
            engine: Engine::Headless,
            ..Config::default()
        };
        let transport = build_transport(&config).unwrap();
        assert_eq!(transport.name(), "headless-chromium");
    }
}
