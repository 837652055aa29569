//! End-to-end cycle tests
//!
//! Real Reddit client, OpenAI provider and SQLite store, with both HTTP APIs
//! served by one wiremock instance.


use std::sync::Arc;
use subreply::config::{BotConfig, ForumCredentials};
use subreply::engine::{CycleEngine, RateLimitStop, SkipReason};
use subreply::forum::reddit::RedditConfig;
use subreply::forum::RedditClient;
use subreply::llm::build_provider;
use subreply::store::{Outcome, SqliteStore, StateStore};
use tempfile::TempDir;
use test_helpers::{listing_child, noon, test_config};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DISCLOSURE: &str = "Automated reply from the Ferrous team.";

async fn mount_reddit(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok",
            "expires_in": 3600
        })))
        .mount(server)
        .await;

    // Newest first: selected, forbidden topic, off-topic, selected
    Mock::given(method("GET"))
        .and(path("/r/rust/new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "Listing",
            "data": {"children": [
                listing_child("a1", "Need a faster linter for CI", 20, 1),
                listing_child("b2", "The politics of lint rules", 20, 1),
                listing_child("c3", "Help with lifetimes", 20, 2),
                listing_child("d4", "clippy complains about my loop", 20, 2),
            ]}
        })))
        .mount(server)
        .await;
}

async fn mount_comment(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/comment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "json": {"errors": [], "data": {"things": [
                {"kind": "t1", "data": {"id": "kx1", "permalink": "/r/rust/comments/a1/_/kx1/"}}
            ]}}
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_completion(server: &MockServer, status: u16) {
    let template = if status == 200 {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "  Ferrous Lint caches results between runs.  "},
                "finish_reason": "stop"
            }]
        }))
    } else {
        ResponseTemplate::new(status).set_body_string("invalid api key")
    };
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(template)
        .mount(server)
        .await;
}

async fn engine(config: &BotConfig, store: Arc<dyn StateStore>) -> CycleEngine {
    let credentials = ForumCredentials {
        client_id: "id".to_string(),
        client_secret: "secret".to_string(),
        username: "ferrous_team".to_string(),
        password: "pw".to_string(),
    };
    let forum = RedditClient::new(RedditConfig::from(&config.forum), credentials).unwrap();
    let provider = build_provider(&config.llm, "test-key".to_string()).unwrap();
    let mut engine = CycleEngine::restore(config, Arc::new(forum), provider, store)
        .await
        .unwrap();
    engine.set_active(true);
    engine
}

async fn open_store(dir: &TempDir) -> Arc<dyn StateStore> {
    Arc::new(
        SqliteStore::open(&dir.path().join("state/subreply.db"))
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn test_live_cycles_post_once_per_interval() {
    let server = MockServer::start().await;
    mount_reddit(&server).await;
    mount_completion(&server, 200).await;
    mount_comment(&server, 2).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), false);
    let store = open_store(&dir).await;
    let mut engine = engine(&config, store.clone()).await;

    let first = engine.run_cycle(noon()).await.unwrap();
    assert_eq!(first.posts_analyzed, 4);
    assert_eq!(first.posts_filtered, 1);
    assert_eq!(first.posts_unmatched, 1);
    assert_eq!(first.posts_selected, 2);
    assert_eq!(first.comments_posted, 1);
    assert!(matches!(
        first.rate_limited,
        Some(RateLimitStop::Interval { .. })
    ));
    assert_eq!(first.replies[0].post_id, "a1");
    assert_eq!(
        first.replies[0].reply,
        format!("Ferrous Lint caches results between runs.\n\n{DISCLOSURE}")
    );

    let later = noon() + chrono::Duration::minutes(10);
    let second = engine.run_cycle(later).await.unwrap();
    assert_eq!(second.posts_already_processed, 1);
    assert_eq!(second.comments_posted, 1);
    assert_eq!(second.replies[0].post_id, "d4");
    assert!(second.rate_limited.is_none());

    let activity = store.recent_activity(10).await.unwrap();
    let ids: Vec<&str> = activity.iter().map(|r| r.post_id.as_str()).collect();
    assert_eq!(ids, vec!["d4", "a1"]);
    assert!(activity.iter().all(|r| r.outcome == Outcome::Posted));
    assert_eq!(activity[0].comment_id.as_deref(), Some("kx1"));
    assert!(activity[0].reply_text.ends_with(DISCLOSURE));

    let stats = store.daily_stats(noon().date_naive()).await.unwrap();
    assert_eq!(stats.comments_posted, 2);
    assert_eq!(stats.posts_analyzed, 7);

    // The submitted form carries the disclosure
    let requests = server.received_requests().await.unwrap();
    let comment_bodies: Vec<String> = requests
        .iter()
        .filter(|r| r.url.path() == "/api/comment")
        .map(|r| String::from_utf8_lossy(&r.body).to_string())
        .collect();
    assert_eq!(comment_bodies.len(), 2);
    assert!(comment_bodies
        .iter()
        .all(|body| body.contains("Ferrous+team") || body.contains("Ferrous%20team")));
}

#[tokio::test]
async fn test_pacing_survives_restart() {
    let server = MockServer::start().await;
    mount_reddit(&server).await;
    mount_completion(&server, 200).await;
    mount_comment(&server, 1).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), false);
    {
        let mut engine = engine(&config, open_store(&dir).await).await;
        engine.run_cycle(noon()).await.unwrap();
    }

    let mut restored = engine(&config, open_store(&dir).await).await;
    let one_minute_later = noon() + chrono::Duration::minutes(1);
    assert_eq!(restored.comments_today(one_minute_later), 1);

    let report = restored.run_cycle(one_minute_later).await.unwrap();
    assert_eq!(report.posts_already_processed, 1);
    assert_eq!(report.comments_posted, 0);
    match report.rate_limited {
        Some(RateLimitStop::Interval { wait_secs }) => assert_eq!(wait_secs, 240),
        other => panic!("expected interval stop, got {other:?}"),
    }
}

#[tokio::test]
async fn test_dry_run_never_submits() {
    let server = MockServer::start().await;
    mount_reddit(&server).await;
    mount_completion(&server, 200).await;
    mount_comment(&server, 0).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), true);
    let store = open_store(&dir).await;
    let mut engine = engine(&config, store.clone()).await;

    let report = engine.run_cycle(noon()).await.unwrap();
    assert_eq!(report.dry_run_replies, 1);
    assert_eq!(report.comments_posted, 0);

    let activity = store.recent_activity(10).await.unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].outcome, Outcome::DryRun);
    assert_eq!(activity[0].comment_id, None);
}

#[tokio::test]
async fn test_generation_failure_leaves_post_for_retry() {
    let server = MockServer::start().await;
    mount_reddit(&server).await;
    mount_completion(&server, 401).await;
    mount_comment(&server, 0).await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), false);
    let store = open_store(&dir).await;
    let mut engine = engine(&config, store.clone()).await;

    let report = engine.run_cycle(noon()).await.unwrap();
    assert_eq!(report.generation_failures, 2);
    assert_eq!(report.comments_posted, 0);
    assert!(!store.is_processed("a1").await.unwrap());
    assert_eq!(engine.comments_today(noon()), 0);
}

#[tokio::test]
async fn test_outside_active_hours_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/rust/new"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), false);
    let mut engine = engine(&config, open_store(&dir).await).await;

    let night = noon() - chrono::Duration::hours(9);
    let report = engine.run_cycle(night).await.unwrap();
    assert!(matches!(
        report.skipped,
        Some(SkipReason::OutsideActiveHours { local_hour: 3, .. })
    ));
}

/// Number of `/api/comment` submissions that targeted `fullname`
async fn submissions_for(server: &MockServer, fullname: &str) -> usize {
    let needle = format!("thing_id={fullname}");
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/comment")
        .filter(|r| String::from_utf8_lossy(&r.body).contains(&needle))
        .count()
}

#[tokio::test]
async fn test_timed_out_reply_is_never_resubmitted() {
    let server = MockServer::start().await;
    mount_reddit(&server).await;
    mount_completion(&server, 200).await;
    // Reddit accepts the comment but answers after the client gave up
    Mock::given(method("POST"))
        .and(path("/api/comment"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"json": {"errors": []}}))
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&server.uri(), false);
    config.forum.timeout_secs = 1;
    let store = open_store(&dir).await;
    let mut engine = engine(&config, store.clone()).await;

    let first = engine.run_cycle(noon()).await.unwrap();
    assert_eq!(first.post_failures, 1);
    assert_eq!(first.comments_posted, 0);
    assert!(matches!(
        first.rate_limited,
        Some(RateLimitStop::Interval { .. })
    ));
    assert!(store.is_processed("a1").await.unwrap());
    assert_eq!(engine.comments_today(noon()), 1);

    let second = engine
        .run_cycle(noon() + chrono::Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(second.posts_already_processed, 1);
    assert_eq!(second.replies[0].post_id, "d4");

    assert_eq!(submissions_for(&server, "t3_a1").await, 1);
    let activity = store.recent_activity(10).await.unwrap();
    assert!(activity
        .iter()
        .all(|r| r.outcome == Outcome::Unconfirmed && r.comment_id.is_none()));
}

#[tokio::test]
async fn test_unreadable_reply_response_is_recorded_as_unconfirmed() {
    let server = MockServer::start().await;
    mount_reddit(&server).await;
    mount_completion(&server, 200).await;
    Mock::given(method("POST"))
        .and(path("/api/comment"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>upstream</html>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), false);
    let store = open_store(&dir).await;
    let mut engine = engine(&config, store.clone()).await;

    let report = engine.run_cycle(noon()).await.unwrap();
    assert_eq!(report.post_failures, 1);
    assert_eq!(report.replies[0].outcome, Outcome::Unconfirmed);

    // Even once pacing allows it, the thread is not answered again
    engine
        .run_cycle(noon() + chrono::Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(submissions_for(&server, "t3_a1").await, 1);

    let stats = store.daily_stats(noon().date_naive()).await.unwrap();
    assert_eq!(stats.comments_posted, 0);
}

#[tokio::test]
async fn test_server_error_on_reply_is_not_retried() {
    let server = MockServer::start().await;
    mount_reddit(&server).await;
    mount_completion(&server, 200).await;
    Mock::given(method("POST"))
        .and(path("/api/comment"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), false);
    let store = open_store(&dir).await;
    let mut engine = engine(&config, store.clone()).await;

    engine.run_cycle(noon()).await.unwrap();
    engine
        .run_cycle(noon() + chrono::Duration::minutes(10))
        .await
        .unwrap();

    assert_eq!(submissions_for(&server, "t3_a1").await, 1);
    let activity = store.recent_activity(10).await.unwrap();
    assert_eq!(activity.last().map(|r| r.post_id.as_str()), Some("a1"));
}
