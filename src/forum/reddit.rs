//! Reddit OAuth client
//!
//! Uses the script-app password grant. Tokens are cached until shortly before
//! expiry; a 401 drops the cached token and the request is retried once.
//! Reddit's `X-Ratelimit-*` headers are tracked and calls are refused locally
//! while the quota is exhausted.

use super::{ForumClient, ForumError, Post, PostedComment};
use crate::config::{ForumCredentials, ForumSection};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Refresh tokens this long before they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Client settings derived from the `[forum]` section
#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub auth_url: String,
    pub api_url: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl From<&ForumSection> for RedditConfig {
    fn from(section: &ForumSection) -> Self {
        Self {
            auth_url: section.auth_url.clone(),
            api_url: section.api_url.trim_end_matches('/').to_string(),
            user_agent: section.user_agent.clone(),
            timeout: Duration::from_secs(section.timeout_secs),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

/// Reddit API client acting as a single account
pub struct RedditClient {
    config: RedditConfig,
    credentials: ForumCredentials,
    client: Client,
    token: Mutex<Option<CachedToken>>,
    blocked_until: std::sync::Mutex<Option<Instant>>,
}

impl RedditClient {
    pub fn new(config: RedditConfig, credentials: ForumCredentials) -> Result<Self, ForumError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ForumError::Network(e.to_string()))?;

        Ok(Self {
            config,
            credentials,
            client,
            token: Mutex::new(None),
            blocked_until: std::sync::Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, ForumError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.fetch_token().await?;
        let access_token = token.access_token.clone();
        *guard = Some(token);
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn fetch_token(&self) -> Result<CachedToken, ForumError> {
        debug!("Requesting Reddit access token for {}", self.credentials.username);

        let response = self
            .client
            .post(&self.config.auth_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ForumError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForumError::Authentication(format!(
                "token endpoint returned {status}"
            )));
        }

        // Reddit reports bad credentials as 200 with an `error` field
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ForumError::InvalidResponse(e.to_string()))?;

        match (body.access_token, body.error) {
            (Some(access_token), None) => {
                let lifetime = Duration::from_secs(body.expires_in.unwrap_or(3600));
                info!(
                    "Obtained Reddit access token, valid for {}s",
                    lifetime.as_secs()
                );
                Ok(CachedToken {
                    access_token,
                    expires_at: Instant::now() + lifetime,
                })
            }
            (_, Some(error)) => Err(ForumError::Authentication(error)),
            (None, None) => Err(ForumError::Authentication(
                "token response had no access_token".to_string(),
            )),
        }
    }

    fn check_quota(&self) -> Result<(), ForumError> {
        let mut blocked = self
            .blocked_until
            .lock()
            .map_err(|_| ForumError::Network("rate limit state poisoned".to_string()))?;
        if let Some(until) = *blocked {
            let now = Instant::now();
            if now < until {
                return Err(ForumError::RateLimited {
                    retry_after: until - now,
                });
            }
            *blocked = None;
        }
        Ok(())
    }

    fn track_quota(&self, headers: &HeaderMap) {
        if let Some(retry_after) = quota_exhausted(headers) {
            warn!(
                "Reddit request quota exhausted, pausing for {}s",
                retry_after.as_secs()
            );
            if let Ok(mut blocked) = self.blocked_until.lock() {
                *blocked = Some(Instant::now() + retry_after);
            }
        }
    }

    /// Send an authenticated request, retrying once with a fresh token on 401
    async fn send<F>(&self, build: F) -> Result<Response, ForumError>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        for attempt in 0..2 {
            self.check_quota()?;
            let token = self.access_token().await?;
            let response = build(&self.client, &token)
                .send()
                .await
                .map_err(|e| ForumError::Network(e.to_string()))?;

            self.track_quota(response.headers());

            match response.status() {
                StatusCode::UNAUTHORIZED if attempt == 0 => {
                    debug!("Reddit returned 401, refreshing token");
                    self.invalidate_token().await;
                }
                StatusCode::UNAUTHORIZED => {
                    return Err(ForumError::Authentication(
                        "request unauthorized after token refresh".to_string(),
                    ))
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = header_secs(response.headers(), "retry-after")
                        .or_else(|| header_secs(response.headers(), "x-ratelimit-reset"))
                        .unwrap_or(60);
                    return Err(ForumError::RateLimited {
                        retry_after: Duration::from_secs(retry_after),
                    });
                }
                status if !status.is_success() => {
                    let message = response.text().await.unwrap_or_default();
                    return Err(ForumError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }
                _ => return Ok(response),
            }
        }

        Err(ForumError::Authentication(
            "request unauthorized after token refresh".to_string(),
        ))
    }

    fn api(&self, client: &Client, method: Method, path: &str, token: &str) -> RequestBuilder {
        client
            .request(method, format!("{}{}", self.config.api_url, path))
            .bearer_auth(token)
    }
}

#[async_trait]
impl ForumClient for RedditClient {
    async fn identity(&self) -> Result<String, ForumError> {
        let response = self
            .send(|client, token| self.api(client, Method::GET, "/api/v1/me", token))
            .await?;
        let me: MeResponse = response
            .json()
            .await
            .map_err(|e| ForumError::InvalidResponse(e.to_string()))?;
        Ok(me.name)
    }

    async fn fetch_new(&self, subreddit: &str, limit: u32) -> Result<Vec<Post>, ForumError> {
        let path = format!("/r/{subreddit}/new");
        let limit = limit.to_string();
        let response = self
            .send(|client, token| {
                self.api(client, Method::GET, &path, token)
                    .query(&[("limit", limit.as_str()), ("raw_json", "1")])
            })
            .await?;

        let listing: Listing = response
            .json()
            .await
            .map_err(|e| ForumError::InvalidResponse(e.to_string()))?;

        let posts: Vec<Post> = listing
            .data
            .children
            .into_iter()
            .filter(|child| child.kind == "t3")
            .map(|child| child.data.into_post())
            .collect();
        debug!("Fetched {} posts from r/{}", posts.len(), subreddit);
        Ok(posts)
    }

    async fn reply(&self, post: &Post, text: &str) -> Result<PostedComment, ForumError> {
        // Errors up to here are raised before the comment is sent
        self.check_quota()?;
        self.access_token().await?;

        let response = self
            .send(|client, token| {
                self.api(client, Method::POST, "/api/comment", token).form(&[
                    ("api_type", "json"),
                    ("thing_id", post.fullname.as_str()),
                    ("text", text),
                ])
            })
            .await
            .map_err(unconfirmed_write)?;

        let body: CommentResponse = response
            .json()
            .await
            .map_err(|e| ForumError::Unconfirmed(format!("unreadable comment response: {e}")))?;
        body.into_posted_comment().map_err(unconfirmed_write)
    }
}

/// Reclassify failures that can happen after Reddit accepted the comment
fn unconfirmed_write(error: ForumError) -> ForumError {
    match error {
        ForumError::Network(message) | ForumError::InvalidResponse(message) => {
            ForumError::Unconfirmed(message)
        }
        ForumError::Api { status, message } if status >= 500 => {
            ForumError::Unconfirmed(format!("API error {status}: {message}"))
        }
        other => other,
    }
}

/// Duration to wait when the quota headers say nothing is left
fn quota_exhausted(headers: &HeaderMap) -> Option<Duration> {
    let remaining: f64 = headers
        .get("x-ratelimit-remaining")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    if remaining >= 1.0 {
        return None;
    }
    let reset = header_secs(headers, "x-ratelimit-reset").unwrap_or(60);
    Some(Duration::from_secs(reset))
}

fn header_secs(headers: &HeaderMap, name: &str) -> Option<u64> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    value
        .parse::<u64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|v| v.max(0.0).ceil() as u64))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    kind: String,
    data: RawPost,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    id: String,
    name: String,
    subreddit: String,
    title: String,
    #[serde(default)]
    selftext: String,
    author: Option<String>,
    permalink: String,
    url: Option<String>,
    #[serde(default)]
    score: i64,
    created_utc: f64,
    #[serde(default)]
    over_18: bool,
    #[serde(default)]
    locked: bool,
    #[serde(default)]
    archived: bool,
}

impl RawPost {
    fn into_post(self) -> Post {
        let created_at: DateTime<Utc> = Utc
            .timestamp_opt(self.created_utc as i64, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Post {
            id: self.id,
            fullname: self.name,
            subreddit: self.subreddit,
            title: self.title,
            selftext: self.selftext,
            author: self.author.filter(|a| a != "[deleted]"),
            permalink: self.permalink,
            url: self.url,
            score: self.score,
            created_at,
            over_18: self.over_18,
            locked: self.locked,
            archived: self.archived,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    json: CommentJson,
}

#[derive(Debug, Deserialize)]
struct CommentJson {
    #[serde(default)]
    errors: Vec<Vec<serde_json::Value>>,
    data: Option<CommentData>,
}

#[derive(Debug, Deserialize)]
struct CommentData {
    things: Vec<CommentThing>,
}

#[derive(Debug, Deserialize)]
struct CommentThing {
    data: CommentThingData,
}

#[derive(Debug, Deserialize)]
struct CommentThingData {
    id: String,
    permalink: Option<String>,
}

impl CommentResponse {
    fn into_posted_comment(self) -> Result<PostedComment, ForumError> {
        if !self.json.errors.is_empty() {
            let reasons: Vec<String> = self
                .json
                .errors
                .iter()
                .map(|err| {
                    err.iter()
                        .filter_map(|v| v.as_str())
                        .collect::<Vec<_>>()
                        .join(": ")
                })
                .collect();
            return Err(ForumError::Rejected(reasons.join("; ")));
        }

        let thing = self
            .json
            .data
            .and_then(|d| d.things.into_iter().next())
            .ok_or_else(|| ForumError::InvalidResponse("comment response had no things".into()))?;

        Ok(PostedComment {
            id: thing.data.id,
            permalink: thing.data.permalink,
        })
    }
}
