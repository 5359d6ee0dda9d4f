use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::extract::normalize_handle;
use crate::models::{AggregateAccountState, ExtractionOutcome, PlatformKind, PlatformStats};
use crate::orchestrator::{AccountHandles, FetchOrchestrator};
use crate::store::{AccountStore, StoreError};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("empty {0} handle")]
    EmptyHandle(PlatformKind),
}

/// What one merge did to an account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Platforms overwritten with fresh counts.
    pub updated: BTreeSet<PlatformKind>,
    /// Platforms whose refresh failed but whose older count was kept.
    pub kept_stale: BTreeSet<PlatformKind>,
    /// Failures with nothing older to fall back on.
    pub failed: BTreeMap<PlatformKind, ErrorKind>,
    pub state: AggregateAccountState,
}

impl RefreshReport {
    pub fn total_followers(&self) -> u64 {
        self.state.total_followers
    }

    pub fn attempted(&self) -> usize {
        self.updated.len() + self.kept_stale.len() + self.failed.len()
    }
}

/// Fold fresh outcomes into `state`. Stale-but-known beats unknown.
///
/// `handles` supplies the username recorded for failures that have no earlier
/// stats to keep. Platforms absent from `results` are left alone.
pub fn merge(
    state: &mut AggregateAccountState,
    results: BTreeMap<PlatformKind, ExtractionOutcome>,
    handles: &AccountHandles,
    now: DateTime<Utc>,
) -> MergeSummary {
    let mut summary = MergeSummary::default();

    for (platform, outcome) in results {
        match outcome {
            ExtractionOutcome::Success(stats) => {
                info!(%platform, followers = ?stats.followers, "storing fresh count");
                state.platforms.insert(platform, stats);
                state.stale.remove(&platform);
                summary.updated.insert(platform);
            }
            ExtractionOutcome::Failure(failure) => {
                let known = state
                    .get(platform)
                    .filter(|prior| prior.is_success())
                    .and_then(|prior| prior.followers);
                if let Some(followers) = known {
                    warn!(%platform, kind = %failure.kind, followers, "refresh failed, keeping last known count");
                    state.stale.insert(platform);
                    summary.kept_stale.insert(platform);
                    continue;
                }

                warn!(%platform, kind = %failure.kind, "refresh failed with no known count");
                let username = handles
                    .get(&platform)
                    .map(|handle| normalize_handle(platform, handle))
                    .or_else(|| state.get(platform).map(|prior| prior.username.clone()))
                    .unwrap_or_default();
                state
                    .platforms
                    .insert(platform, PlatformStats::failed(platform, username, &failure));
                state.stale.remove(&platform);
                summary.failed.insert(platform, failure.kind);
            }
        }
    }

    state.recompute_total();
    state.last_refreshed = Some(now);
    summary
}

/// Per-platform result of [`merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub updated: BTreeSet<PlatformKind>,
    pub kept_stale: BTreeSet<PlatformKind>,
    pub failed: BTreeMap<PlatformKind, ErrorKind>,
}

impl MergeSummary {
    fn into_report(self, state: AggregateAccountState) -> RefreshReport {
        RefreshReport {
            updated: self.updated,
            kept_stale: self.kept_stale,
            failed: self.failed,
            state,
        }
    }
}

/// Re-fetches connected platforms for an account and persists the merged state.
///
/// Calls for the same account run one at a time, from load to save, so a slow
/// refresh can never overwrite a connection made while it was fetching.
pub struct RefreshCoordinator {
    orchestrator: Arc<FetchOrchestrator>,
    store: Arc<dyn AccountStore>,
    account_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RefreshCoordinator {
    pub fn new(orchestrator: Arc<FetchOrchestrator>, store: Arc<dyn AccountStore>) -> Self {
        Self {
            orchestrator,
            store,
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_account(&self, account_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.account_locks.lock().await;
            // Entries nobody holds or waits on are only referenced by the map.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        if lock.try_lock().is_err() {
            debug!(account_id, "waiting for in-flight update of account");
        }
        lock.lock_owned().await
    }

    /// Refresh every connected platform, or only those in `filter`.
    ///
    /// Filtered platforms that were never connected are ignored. When nothing is
    /// left to refresh the stored state is returned untouched.
    pub async fn refresh(
        &self,
        account_id: &str,
        filter: Option<&[PlatformKind]>,
    ) -> Result<RefreshReport, RefreshError> {
        let _guard = self.lock_account(account_id).await;
        let mut state = self.store.load(account_id).await?;
        let handles: AccountHandles = state
            .connections()
            .into_iter()
            .filter(|(platform, _)| filter.map_or(true, |wanted| wanted.contains(platform)))
            .collect();

        if handles.is_empty() {
            info!(account_id, "no connected platforms to refresh");
            return Ok(RefreshReport {
                state,
                ..RefreshReport::default()
            });
        }

        info!(
            account_id,
            platforms = ?handles.keys().collect::<Vec<_>>(),
            "refreshing account"
        );
        let results = self.orchestrator.fetch_all(&handles).await;
        let summary = merge(&mut state, results, &handles, Utc::now());
        self.store.save(account_id, &state).await?;

        info!(
            account_id,
            updated = summary.updated.len(),
            stale = summary.kept_stale.len(),
            failed = summary.failed.len(),
            total_followers = state.total_followers,
            "account refreshed"
        );
        Ok(summary.into_report(state))
    }

    /// Connect a platform to the account, or point it at a different handle.
    ///
    /// Reconnecting the same handle behaves like a single-platform refresh. A new
    /// handle never inherits the previous handle's count.
    pub async fn connect(
        &self,
        account_id: &str,
        platform: PlatformKind,
        handle: &str,
    ) -> Result<RefreshReport, RefreshError> {
        let normalized = normalize_handle(platform, handle);
        if normalized.is_empty() {
            return Err(RefreshError::EmptyHandle(platform));
        }

        let _guard = self.lock_account(account_id).await;
        let mut state = self.store.load(account_id).await?;
        let same_account = state
            .get(platform)
            .is_some_and(|prior| prior.username == normalized);
        if !same_account && state.platforms.remove(&platform).is_some() {
            info!(account_id, %platform, handle = %normalized, "replacing connected handle");
            state.stale.remove(&platform);
        }

        let handles = AccountHandles::from([(platform, normalized)]);
        let results = self.orchestrator.fetch_all(&handles).await;
        let summary = merge(&mut state, results, &handles, Utc::now());
        self.store.save(account_id, &state).await?;
        Ok(summary.into_report(state))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::Config;
    use crate::error::ExtractionFailure;
    use crate::extract::{instagram, tiktok, youtube};
    use crate::store::MemoryAccountStore;
    use crate::testing::{instagram_api_json, tiktok_profile_html, MockTransport, UnavailableStore};

    fn known(platform: PlatformKind, username: &str, followers: u64) -> PlatformStats {
        PlatformStats::success(platform, username, followers, None, None)
    }

    fn seeded_state() -> AggregateAccountState {
        let mut state = AggregateAccountState::default();
        state
            .platforms
            .insert(PlatformKind::Instagram, known(PlatformKind::Instagram, "ok_user", 500));
        state
            .platforms
            .insert(PlatformKind::Youtube, known(PlatformKind::Youtube, "@sample", 300));
        state.recompute_total();
        state
    }

    fn failure(kind: ErrorKind) -> ExtractionOutcome {
        ExtractionOutcome::Failure(ExtractionFailure::new(kind, "boom"))
    }

    #[test]
    fn failed_refresh_keeps_the_known_count() {
        let mut state = seeded_state();
        let handles = AccountHandles::from([(PlatformKind::Youtube, "@sample".to_string())]);
        let results = BTreeMap::from([(PlatformKind::Youtube, failure(ErrorKind::Timeout))]);

        let summary = merge(&mut state, results, &handles, Utc::now());

        assert_eq!(state.followers(PlatformKind::Youtube), Some(300));
        assert_eq!(state.followers(PlatformKind::Instagram), Some(500));
        assert_eq!(state.total_followers, 800);
        assert!(state.is_stale(PlatformKind::Youtube));
        assert_eq!(summary.kept_stale, BTreeSet::from([PlatformKind::Youtube]));
        assert!(summary.failed.is_empty());
    }

    #[test]
    fn success_overwrites_and_clears_stale() {
        let mut state = seeded_state();
        state.stale.insert(PlatformKind::Youtube);
        let handles = AccountHandles::from([(PlatformKind::Youtube, "@sample".to_string())]);
        let results = BTreeMap::from([(
            PlatformKind::Youtube,
            ExtractionOutcome::Success(known(PlatformKind::Youtube, "@sample", 450)),
        )]);

        let now = Utc::now();
        let summary = merge(&mut state, results, &handles, now);

        assert_eq!(state.followers(PlatformKind::Youtube), Some(450));
        assert!(!state.is_stale(PlatformKind::Youtube));
        assert_eq!(state.total_followers, 950);
        assert_eq!(state.last_refreshed, Some(now));
        assert_eq!(summary.updated, BTreeSet::from([PlatformKind::Youtube]));
    }

    #[test]
    fn zero_is_a_legitimate_fresh_count() {
        let mut state = seeded_state();
        let handles = AccountHandles::from([(PlatformKind::Youtube, "@sample".to_string())]);
        let results = BTreeMap::from([(
            PlatformKind::Youtube,
            ExtractionOutcome::Success(known(PlatformKind::Youtube, "@sample", 0)),
        )]);

        merge(&mut state, results, &handles, Utc::now());
        assert_eq!(state.followers(PlatformKind::Youtube), Some(0));
        assert_eq!(state.total_followers, 500);
    }

    #[test]
    fn failure_without_history_is_recorded() {
        let mut state = seeded_state();
        let handles = AccountHandles::from([(PlatformKind::Tiktok, "@newbie".to_string())]);
        let results =
            BTreeMap::from([(PlatformKind::Tiktok, failure(ErrorKind::UserNotFound))]);

        let summary = merge(&mut state, results, &handles, Utc::now());

        let stats = state.get(PlatformKind::Tiktok).unwrap();
        assert_eq!(stats.username, "newbie");
        assert_eq!(stats.error_code, Some(ErrorKind::UserNotFound));
        assert!(!state.is_stale(PlatformKind::Tiktok));
        assert_eq!(state.total_followers, 800);
        assert_eq!(summary.failed[&PlatformKind::Tiktok], ErrorKind::UserNotFound);
    }

    fn coordinator(transport: Arc<MockTransport>, store: MemoryAccountStore) -> RefreshCoordinator {
        let orchestrator = Arc::new(FetchOrchestrator::new(transport, &Config::default()));
        RefreshCoordinator::new(orchestrator, Arc::new(store))
    }

    #[tokio::test]
    async fn filtered_refresh_only_touches_the_filter() {
        let store = MemoryAccountStore::new();
        store.seed("acct", seeded_state()).await;
        // Nothing is registered for youtube, so that fetch fails.
        let transport = Arc::new(MockTransport::new());

        let report = coordinator(transport.clone(), store.clone())
            .refresh("acct", Some(&[PlatformKind::Youtube]))
            .await
            .unwrap();

        assert_eq!(report.total_followers(), 800);
        assert_eq!(report.kept_stale, BTreeSet::from([PlatformKind::Youtube]));
        assert_eq!(transport.requested_urls(), vec![youtube::channel_url("@sample")]);

        let saved = store.load("acct").await.unwrap();
        assert_eq!(saved.followers(PlatformKind::Youtube), Some(300));
        assert_eq!(saved.followers(PlatformKind::Instagram), Some(500));
        assert!(saved.last_refreshed.is_some());
    }

    #[tokio::test]
    async fn refresh_without_filter_uses_every_connection() {
        let store = MemoryAccountStore::new();
        store.seed("acct", seeded_state()).await;
        let transport = Arc::new(
            MockTransport::new()
                .on_page(&instagram::api_url("ok_user"), &instagram_api_json(640, 10, 3))
                .on_page(&youtube::channel_url("@sample"), r#"{"subscriberCount":"310"}"#),
        );

        let report = coordinator(transport, store).refresh("acct", None).await.unwrap();
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.total_followers(), 950);
        assert!(report.state.stale.is_empty());
    }

    #[tokio::test]
    async fn refresh_of_unknown_account_is_a_no_op() {
        let store = MemoryAccountStore::new();
        let transport = Arc::new(MockTransport::new());
        let report = coordinator(transport.clone(), store.clone())
            .refresh("ghost", None)
            .await
            .unwrap();

        assert_eq!(report.attempted(), 0);
        assert!(transport.requests().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn connect_adds_a_platform() {
        let store = MemoryAccountStore::new();
        store.seed("acct", seeded_state()).await;
        let transport = Arc::new(MockTransport::new().on_page(
            "https://www.tiktok.com/@sample",
            &crate::testing::tiktok_profile_html(42_000, 1, 1),
        ));

        let report = coordinator(transport, store)
            .connect("acct", PlatformKind::Tiktok, "@sample")
            .await
            .unwrap();
        assert_eq!(report.updated, BTreeSet::from([PlatformKind::Tiktok]));
        assert_eq!(report.total_followers(), 42_800);
    }

    #[tokio::test]
    async fn connecting_a_new_handle_drops_the_old_count() {
        let store = MemoryAccountStore::new();
        store.seed("acct", seeded_state()).await;
        let transport = Arc::new(MockTransport::new());

        let report = coordinator(transport, store)
            .connect("acct", PlatformKind::Youtube, "@other")
            .await
            .unwrap();

        let stats = report.state.get(PlatformKind::Youtube).unwrap();
        assert_eq!(stats.username, "@other");
        assert_eq!(stats.followers, None);
        assert_eq!(report.total_followers(), 500);
    }

    #[tokio::test]
    async fn connect_rejects_blank_handles() {
        let store = MemoryAccountStore::new();
        let transport = Arc::new(MockTransport::new());
        let err = coordinator(transport, store)
            .connect("acct", PlatformKind::Instagram, "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::EmptyHandle(PlatformKind::Instagram)));
    }

    #[tokio::test]
    async fn connect_during_a_slow_refresh_is_not_lost() {
        let mut seeded = AggregateAccountState::default();
        seeded
            .platforms
            .insert(PlatformKind::Youtube, known(PlatformKind::Youtube, "@sample", 300));
        seeded.recompute_total();
        let store = MemoryAccountStore::new();
        store.seed("acct", seeded).await;

        let transport = Arc::new(
            MockTransport::new()
                .on_delayed_page(
                    &youtube::channel_url("@sample"),
                    Duration::from_millis(200),
                    r#"{"subscriberCount":"310"}"#,
                )
                .on_page(&tiktok::profile_url("sample"), &tiktok_profile_html(42_000, 1, 1)),
        );
        let coordinator = Arc::new(coordinator(transport, store.clone()));

        let refreshing = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.refresh("acct", None).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator
            .connect("acct", PlatformKind::Tiktok, "@sample")
            .await
            .unwrap();
        refreshing.await.unwrap().unwrap();

        let saved = store.load("acct").await.unwrap();
        assert_eq!(saved.followers(PlatformKind::Youtube), Some(310));
        assert_eq!(saved.followers(PlatformKind::Tiktok), Some(42_000));
        assert_eq!(saved.total_followers, 42_310);
    }

    #[tokio::test]
    async fn other_accounts_are_not_serialized_behind_each_other() {
        let store = MemoryAccountStore::new();
        let transport = Arc::new(
            MockTransport::new()
                .on_delayed_page(
                    &tiktok::profile_url("slow"),
                    Duration::from_millis(300),
                    &tiktok_profile_html(1, 1, 1),
                )
                .on_page(&tiktok::profile_url("fast"), &tiktok_profile_html(2, 1, 1)),
        );
        let coordinator = Arc::new(coordinator(transport, store));

        let slow = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.connect("a", PlatformKind::Tiktok, "slow").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fast = tokio::time::timeout(
            Duration::from_millis(200),
            coordinator.connect("b", PlatformKind::Tiktok, "fast"),
        )
        .await
        .expect("account b waited on account a")
        .unwrap();
        assert_eq!(fast.total_followers(), 2);
        assert_eq!(slow.await.unwrap().unwrap().total_followers(), 1);
    }

    #[tokio::test]
    async fn store_outage_is_reported() {
        let orchestrator = Arc::new(FetchOrchestrator::new(
            Arc::new(MockTransport::new()),
            &Config::default(),
        ));
        let coordinator = RefreshCoordinator::new(orchestrator, Arc::new(UnavailableStore));

        let err = coordinator.refresh("acct", None).await.unwrap_err();
        assert!(matches!(err, RefreshError::Store(StoreError::Unavailable(_))));
        assert!(err.to_string().contains("unavailable"));
    }
}
