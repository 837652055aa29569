//! Status and control HTTP server
//!
//! Read-only routes expose health, the runner snapshot, metrics and recent
//! activity. Control routes start and stop the bot or trigger a cycle; they
//! require the `X-API-Key` header when a key is configured.

use crate::clock::Clock;
use crate::engine::{RunnerHandle, RunnerStatus};
use crate::error::{BotError, BotResult};
use crate::observability::metrics::metrics;
use crate::store::StateStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection, Reply};

const DEFAULT_ACTIVITY_LIMIT: u32 = 50;
const MAX_ACTIVITY_LIMIT: u32 = 500;

/// Missed scan intervals after which an active runner counts as stale
const STALE_INTERVALS: i64 = 3;

type JsonReply = WithStatus<Json>;

pub struct StatusServer {
    bot_name: String,
    port: u16,
    runner: RunnerHandle,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    api_key: Option<String>,
}

impl StatusServer {
    pub fn new(
        bot_name: String,
        port: u16,
        runner: RunnerHandle,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            bot_name,
            port,
            runner,
            store,
            clock,
            api_key,
        }
    }

    /// All routes, without binding a socket
    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let server = warp::any().map(move || self.clone());

        // GET /health - overall health with individual checks
        let health = warp::path!("health")
            .and(warp::get())
            .and(server.clone())
            .and_then(Self::health_handler);

        // GET /status - runner snapshot
        let status = warp::path!("status")
            .and(warp::get())
            .and(server.clone())
            .and_then(Self::status_handler);

        // GET /metrics - counters and cycle timings
        let metrics_route = warp::path!("metrics")
            .and(warp::get())
            .and_then(Self::metrics_handler);

        // GET /activity?limit=N - newest processed posts
        let activity = warp::path!("activity")
            .and(warp::get())
            .and(warp::query::<ActivityQuery>())
            .and(server.clone())
            .and_then(Self::activity_handler);

        // POST /control/{start,stop,run}
        let control = warp::path!("control" / String)
            .and(warp::post())
            .and(warp::header::optional::<String>("x-api-key"))
            .and(server)
            .and_then(Self::control_handler);

        health
            .or(status)
            .or(metrics_route)
            .or(activity)
            .or(control)
            .with(warp::cors().allow_any_origin())
    }

    /// Serve until `shutdown` turns true
    pub async fn serve(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> BotResult<()> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let routes = self.clone().routes();

        let (bound, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, async move {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            })
            .map_err(|e| BotError::internal(format!("status server bind failed: {e}")))?;

        info!(addr = %bound, "Status server listening");
        server.await;
        info!("Status server stopped");
        Ok(())
    }

    fn authorized(&self, provided: Option<&str>) -> bool {
        match &self.api_key {
            Some(expected) => provided == Some(expected.as_str()),
            None => true,
        }
    }

    async fn health_handler(server: Arc<Self>) -> Result<JsonReply, Infallible> {
        let status = server.runner.status().await;
        let health = health_report(&server.bot_name, &status, server.clock.now());
        let code = if health.status == "healthy" {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        Ok(json_reply(&health, code))
    }

    async fn status_handler(server: Arc<Self>) -> Result<JsonReply, Infallible> {
        let response = StatusResponse {
            bot: server.bot_name.clone(),
            version: env!("CARGO_PKG_VERSION"),
            runner: server.runner.status().await,
        };
        Ok(json_reply(&response, StatusCode::OK))
    }

    async fn metrics_handler() -> Result<JsonReply, Infallible> {
        Ok(json_reply(&metrics().get_metrics(), StatusCode::OK))
    }

    async fn activity_handler(
        query: ActivityQuery,
        server: Arc<Self>,
    ) -> Result<JsonReply, Infallible> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
            .min(MAX_ACTIVITY_LIMIT);

        Ok(match server.store.recent_activity(limit).await {
            Ok(records) => json_reply(&records, StatusCode::OK),
            Err(e) => {
                warn!(error = %e, "Failed to read recent activity");
                error_reply(
                    &BotError::from(e).public_message(),
                    StatusCode::INTERNAL_SERVER_ERROR,
                )
            }
        })
    }

    async fn control_handler(
        action: String,
        api_key: Option<String>,
        server: Arc<Self>,
    ) -> Result<JsonReply, Infallible> {
        if !server.authorized(api_key.as_deref()) {
            warn!(action = %action, "Rejected control request without a valid API key");
            return Ok(error_reply("invalid or missing API key", StatusCode::UNAUTHORIZED));
        }

        let runner = &server.runner;
        let result = match action.as_str() {
            "start" => runner.start().await.map(|_| None),
            "stop" => runner.stop().await.map(|_| None),
            "run" => runner.run_once().await.map(Some),
            other => {
                return Ok(error_reply(
                    &format!("unknown control action '{other}'"),
                    StatusCode::NOT_FOUND,
                ))
            }
        };

        Ok(match result {
            Ok(report) => json_reply(
                &ControlResponse {
                    action,
                    ok: true,
                    report,
                },
                StatusCode::OK,
            ),
            Err(e) => error_reply(&e.public_message(), StatusCode::SERVICE_UNAVAILABLE),
        })
    }
}

/// Derive the health document from a runner snapshot (pure function)
fn health_report(bot_name: &str, status: &RunnerStatus, now: DateTime<Utc>) -> HealthStatus {
    let mut checks = HashMap::new();

    let last_cycle = match &status.last_error {
        Some(error) => HealthCheck {
            status: "unhealthy".to_string(),
            message: Some(error.clone()),
        },
        None => HealthCheck {
            status: "healthy".to_string(),
            message: None,
        },
    };
    checks.insert("last_cycle".to_string(), last_cycle);

    let stale_after = chrono::Duration::seconds(status.scan_interval_secs as i64 * STALE_INTERVALS);
    let scheduler = match status.last_cycle_at {
        Some(at) if status.active && status.in_active_hours && now - at > stale_after => {
            HealthCheck {
                status: "stale".to_string(),
                message: Some(format!(
                    "no cycle for {} seconds",
                    (now - at).num_seconds()
                )),
            }
        }
        _ => HealthCheck {
            status: "healthy".to_string(),
            message: None,
        },
    };
    checks.insert("scheduler".to_string(), scheduler);

    let healthy = checks.values().all(|check| check.status == "healthy");
    HealthStatus {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        bot: bot_name.to_string(),
        active: status.active,
        timestamp: now.timestamp(),
        checks,
    }
}

fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> JsonReply {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn error_reply(message: &str, status: StatusCode) -> JsonReply {
    json_reply(
        &ErrorResponse {
            error: message.to_string(),
        },
        status,
    )
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthCheck {
    status: String,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    bot: String,
    active: bool,
    timestamp: i64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    bot: String,
    version: &'static str,
    #[serde(flatten)]
    runner: RunnerStatus,
}

#[derive(Debug, Serialize)]
struct ControlResponse {
    action: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<crate::engine::CycleReport>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DailyStats;
    use chrono::{NaiveDate, TimeZone};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn snapshot() -> RunnerStatus {
        RunnerStatus {
            active: true,
            dry_run: true,
            cycle_in_progress: false,
            in_active_hours: true,
            active_hours: "9h-22h UTC".to_string(),
            subreddits: vec!["rust".to_string()],
            scan_interval_secs: 60,
            cycles_run: 1,
            comments_today: 0,
            last_comment_at: None,
            today: DailyStats::empty(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()),
            last_cycle_at: Some(noon()),
            last_report: None,
            last_error: None,
        }
    }

    #[test]
    fn test_health_report_healthy() {
        let health = health_report("bot", &snapshot(), noon());
        assert_eq!(health.status, "healthy");
        assert!(health.checks.contains_key("scheduler"));
        assert!(health.checks.contains_key("last_cycle"));
    }

    #[test]
    fn test_health_report_degraded_on_error() {
        let mut status = snapshot();
        status.last_error = Some("Forum error: Authentication failed".to_string());
        let health = health_report("bot", &status, noon());
        assert_eq!(health.status, "degraded");
        assert_eq!(health.checks["last_cycle"].status, "unhealthy");
    }

    #[test]
    fn test_health_report_stale_scheduler() {
        let status = snapshot();
        let three_intervals = noon() + chrono::Duration::seconds(180);
        assert_eq!(
            health_report("bot", &status, three_intervals).checks["scheduler"].status,
            "healthy"
        );

        let later = noon() + chrono::Duration::seconds(600);
        let health = health_report("bot", &status, later);
        assert_eq!(health.checks["scheduler"].status, "stale");
        assert_eq!(health.timestamp, later.timestamp());

        let mut inactive = status;
        inactive.active = false;
        assert_eq!(health_report("bot", &inactive, later).status, "healthy");
    }

    mod routes {
        use super::super::*;
        use crate::clock::FixedClock;
        use crate::config::BotConfig;
        use crate::engine::{BotRunner, CycleEngine};
        use crate::policy::RateState;
        use crate::testing::mocks::{sample_post, MemoryStore, MockForum, MockLlmProvider};
        use chrono::TimeZone;
        use std::time::Duration;

        type Served = (Arc<StatusServer>, Arc<FixedClock>, watch::Sender<bool>);

        async fn server(api_key: Option<&str>) -> Served {
            let noon = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
            let clock = Arc::new(FixedClock::new(noon));
            let config = BotConfig::test_config();
            let forum = MockForum::new();
            forum
                .add_posts(
                    "rust",
                    vec![sample_post(
                        "abc",
                        "rust",
                        "Which linter do you use?",
                        noon - chrono::Duration::hours(1),
                    )],
                )
                .await;
            let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
            let engine = CycleEngine::new(
                &config,
                Arc::new(forum),
                Arc::new(MockLlmProvider::single_response("Try clippy.")),
                store.clone(),
                RateState::default(),
                false,
            );
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let (runner, handle) = BotRunner::new(
                engine,
                store.clone(),
                clock.clone(),
                Duration::from_secs(3600),
                shutdown_rx,
            );
            tokio::spawn(runner.run());

            let server = StatusServer::new(
                "subreply-test".to_string(),
                0,
                handle,
                store,
                clock.clone(),
                api_key.map(str::to_string),
            );
            (Arc::new(server), clock, shutdown_tx)
        }

        #[tokio::test]
        async fn test_status_route() {
            let (server, _clock, _shutdown) = server(None).await;
            let routes = server.routes();

            let response = warp::test::request()
                .method("GET")
                .path("/status")
                .reply(&routes)
                .await;
            assert_eq!(response.status(), StatusCode::OK);

            let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
            assert_eq!(body["bot"], "subreply-test");
            assert_eq!(body["active"], false);
            assert_eq!(body["subreddits"][0], "rust");
        }

        #[tokio::test]
        async fn test_control_requires_api_key() {
            let (server, _clock, _shutdown) = server(Some("letmein")).await;
            let routes = server.routes();

            let response = warp::test::request()
                .method("POST")
                .path("/control/start")
                .reply(&routes)
                .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

            let response = warp::test::request()
                .method("POST")
                .path("/control/start")
                .header("x-api-key", "wrong")
                .reply(&routes)
                .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

            let response = warp::test::request()
                .method("POST")
                .path("/control/start")
                .header("x-api-key", "letmein")
                .reply(&routes)
                .await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        #[tokio::test]
        async fn test_run_then_activity() {
            let (server, _clock, _shutdown) = server(None).await;
            let routes = server.routes();

            let response = warp::test::request()
                .method("POST")
                .path("/control/run")
                .reply(&routes)
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
            assert_eq!(body["report"]["dry_run_replies"], 1);

            let response = warp::test::request()
                .method("GET")
                .path("/activity?limit=5")
                .reply(&routes)
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
            assert_eq!(body.as_array().unwrap().len(), 1);
            assert_eq!(body[0]["post_id"], "abc");
            assert_eq!(body[0]["outcome"], "dry_run");
        }

        #[tokio::test]
        async fn test_health_goes_stale_on_the_injected_clock() {
            let (server, clock, _shutdown) = server(None).await;
            let routes = server.routes();

            for action in ["start", "run"] {
                let response = warp::test::request()
                    .method("POST")
                    .path(&format!("/control/{action}"))
                    .reply(&routes)
                    .await;
                assert_eq!(response.status(), StatusCode::OK);
            }

            let response = warp::test::request()
                .method("GET")
                .path("/health")
                .reply(&routes)
                .await;
            assert_eq!(response.status(), StatusCode::OK);

            // Four missed hourly scans, still inside the 9h-22h window
            clock.advance(chrono::Duration::hours(4));
            let response = warp::test::request()
                .method("GET")
                .path("/health")
                .reply(&routes)
                .await;
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
            let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
            assert_eq!(body["checks"]["scheduler"]["status"], "stale");
        }

        #[tokio::test]
        async fn test_unknown_action_and_wrong_method() {
            let (server, _clock, _shutdown) = server(None).await;
            let routes = server.routes();

            let response = warp::test::request()
                .method("POST")
                .path("/control/explode")
                .reply(&routes)
                .await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);

            let response = warp::test::request()
                .method("POST")
                .path("/status")
                .reply(&routes)
                .await;
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        }
    }
}
