use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use social_stats::extract::{instagram, tiktok, youtube};
use social_stats::testing::{instagram_api_json, tiktok_profile_html, MockTransport};
use social_stats::{
    AccountHandles, AccountStore, AggregateAccountState, Config, ErrorKind, ExtractionOutcome,
    FetchOrchestrator, MemoryAccountStore, PlatformKind, PlatformStats, RefreshCoordinator,
};

fn orchestrator(transport: Arc<MockTransport>) -> FetchOrchestrator {
    FetchOrchestrator::new(transport, &Config::default())
}

#[tokio::test]
async fn tiktok_handle_with_at_sign_end_to_end() {
    let transport = Arc::new(
        MockTransport::new().on_page(&tiktok::profile_url("sample"), &tiktok_profile_html(42_000, 12, 3)),
    );

    let outcome = orchestrator(transport)
        .fetch_one(PlatformKind::Tiktok, "@sample")
        .await;

    let ExtractionOutcome::Success(stats) = outcome else {
        panic!("expected success");
    };
    assert_eq!(stats.followers, Some(42_000));
    assert_eq!(stats.platform, PlatformKind::Tiktok);
    assert_eq!(stats.username, "sample");

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["platform"], "tiktok");
    assert_eq!(json["followers"], 42_000);
}

#[tokio::test]
async fn one_failing_platform_leaves_the_other_intact() {
    let transport = Arc::new(
        MockTransport::new()
            .on_page(&instagram::api_url("ok_user"), &instagram_api_json(1_500, 20, 40))
            .on_delayed_error(
                &tiktok::profile_url("failing_user"),
                Duration::from_millis(30),
                social_stats::TransportError::Connect("connection reset".to_string()),
            ),
    );
    let accounts = AccountHandles::from([
        (PlatformKind::Instagram, "ok_user".to_string()),
        (PlatformKind::Tiktok, "failing_user".to_string()),
    ]);

    let results = orchestrator(transport).fetch_all(&accounts).await;

    assert_eq!(results.len(), 2);
    let ExtractionOutcome::Success(stats) = &results[&PlatformKind::Instagram] else {
        panic!("instagram should succeed");
    };
    assert_eq!(stats.followers, Some(1_500));
    assert_eq!(stats.following, Some(20));
    assert_eq!(stats.posts, Some(40));
    assert_eq!(
        results[&PlatformKind::Tiktok].error_kind(),
        Some(ErrorKind::NetworkError)
    );
}

#[tokio::test]
async fn instagram_missing_profile_skips_page_fallbacks() {
    let transport = Arc::new(
        MockTransport::new()
            .on_status(&instagram::api_url("ghost"), 404, "")
            .on_status(&instagram::profile_url("ghost"), 404, "<html>Sorry</html>"),
    );

    let outcome = orchestrator(transport.clone())
        .fetch_one(PlatformKind::Instagram, "ghost")
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::UserNotFound));
    assert_eq!(
        transport.requested_urls(),
        vec![instagram::api_url("ghost"), instagram::profile_url("ghost")]
    );
}

#[tokio::test]
async fn timeouts_are_classified_not_raised() {
    let transport = Arc::new(MockTransport::new().on_timeout(&youtube::channel_url("@slow")));

    let outcome = orchestrator(transport)
        .fetch_one(PlatformKind::Youtube, "https://www.youtube.com/@slow")
        .await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn failed_refresh_keeps_known_counts_in_the_total() {
    let mut seeded = AggregateAccountState::default();
    seeded.platforms.insert(
        PlatformKind::Instagram,
        PlatformStats::success(PlatformKind::Instagram, "ok_user", 500, None, None),
    );
    seeded.platforms.insert(
        PlatformKind::Youtube,
        PlatformStats::success(PlatformKind::Youtube, "@sample", 300, None, None),
    );
    seeded.recompute_total();

    let store = MemoryAccountStore::new();
    store.seed("creator-1", seeded).await;
    let transport = Arc::new(
        MockTransport::new().on_status(&youtube::channel_url("@sample"), 503, "unavailable"),
    );
    let coordinator = RefreshCoordinator::new(Arc::new(orchestrator(transport)), Arc::new(store.clone()));

    let report = coordinator
        .refresh("creator-1", Some(&[PlatformKind::Youtube]))
        .await
        .unwrap();

    assert_eq!(report.kept_stale, BTreeSet::from([PlatformKind::Youtube]));
    let saved = store.load("creator-1").await.unwrap();
    assert_eq!(saved.followers(PlatformKind::Youtube), Some(300));
    assert_eq!(saved.followers(PlatformKind::Instagram), Some(500));
    assert_eq!(saved.total_followers, 800);
    assert!(saved.is_stale(PlatformKind::Youtube));
}
