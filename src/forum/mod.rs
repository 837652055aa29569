//! Forum access layer
//!
//! The cycle engine talks to the forum through [`ForumClient`] so the Reddit
//! HTTP client can be swapped for a mock in tests.

pub mod reddit;

pub use reddit::RedditClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A submission read from a subreddit listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Base-36 id without the kind prefix
    pub id: String,
    /// Full thing name, e.g. `t3_abc123`
    pub fullname: String,
    pub subreddit: String,
    pub title: String,
    pub selftext: String,
    pub author: Option<String>,
    pub permalink: String,
    pub url: Option<String>,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    pub over_18: bool,
    pub locked: bool,
    pub archived: bool,
}

impl Post {
    /// Lowercased title and body, the text every content rule looks at
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.title, self.selftext).to_lowercase()
    }

    /// Hours elapsed since creation, never negative
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.created_at).num_seconds().max(0);
        secs as f64 / 3600.0
    }
}

/// A reply the forum accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedComment {
    pub id: String,
    pub permalink: Option<String>,
}

/// Forum API errors
#[derive(Debug, Clone, Error)]
pub enum ForumError {
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Reply rejected by forum: {0}")]
    Rejected(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// The write reached the forum but its result is unknown
    #[error("Reply outcome unknown: {0}")]
    Unconfirmed(String),
}

impl ForumError {
    /// Whether the whole cycle should stop rather than move to the next subreddit
    pub fn is_fatal_for_cycle(&self) -> bool {
        matches!(
            self,
            ForumError::RateLimited { .. } | ForumError::Authentication(_)
        )
    }

    /// Whether a failed write may still have been published
    pub fn may_have_posted(&self) -> bool {
        matches!(self, ForumError::Unconfirmed(_))
    }
}

/// Read and write access to the forum under one account
#[async_trait]
pub trait ForumClient: Send + Sync {
    /// Name of the account the client acts as
    async fn identity(&self) -> Result<String, ForumError>;

    /// Newest submissions of a subreddit, newest first
    async fn fetch_new(&self, subreddit: &str, limit: u32) -> Result<Vec<Post>, ForumError>;

    /// Submit a top-level reply to a post
    async fn reply(&self, post: &Post, text: &str) -> Result<PostedComment, ForumError>;
}
