//! Persistent bot state
//!
//! Everything that must survive a restart lives behind [`StateStore`]: the
//! processed-post ledger that keeps replies idempotent, the rate limiter
//! state, the active flag and the per-day counters.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::policy::RateState;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database connection failed: {0}")]
    Connection(String),
    #[error("Database query failed: {0}")]
    Query(String),
    #[error("Corrupt stored value for {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}

/// What happened to a processed post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Posted,
    DryRun,
    /// Submission failed in a way that may still have published the reply
    Unconfirmed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Posted => "posted",
            Outcome::DryRun => "dry_run",
            Outcome::Unconfirmed => "unconfirmed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posted" => Ok(Outcome::Posted),
            "dry_run" => Ok(Outcome::DryRun),
            "unconfirmed" => Ok(Outcome::Unconfirmed),
            other => Err(format!("unknown outcome '{other}'")),
        }
    }
}

/// One row of the processed-post ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub post_id: String,
    pub subreddit: String,
    pub product_id: String,
    pub outcome: Outcome,
    pub comment_id: Option<String>,
    pub reply_text: String,
    pub processed_at: DateTime<Utc>,
}

/// Counters for one local calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub day: NaiveDate,
    pub posts_analyzed: u64,
    pub posts_filtered: u64,
    pub posts_selected: u64,
    pub comments_posted: u64,
}

impl DailyStats {
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            posts_analyzed: 0,
            posts_filtered: 0,
            posts_selected: 0,
            comments_posted: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.posts_analyzed == 0
            && self.posts_filtered == 0
            && self.posts_selected == 0
            && self.comments_posted == 0
    }

    /// Add another set of counters for the same day
    pub fn merge(&mut self, other: &DailyStats) {
        self.posts_analyzed += other.posts_analyzed;
        self.posts_filtered += other.posts_filtered;
        self.posts_selected += other.posts_selected;
        self.comments_posted += other.comments_posted;
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create tables if needed
    async fn migrate(&self) -> Result<(), StoreError>;

    async fn is_processed(&self, post_id: &str) -> Result<bool, StoreError>;

    /// Returns false when the post was already recorded
    async fn record_processed(&self, record: &ProcessedRecord) -> Result<bool, StoreError>;

    /// Newest records first
    async fn recent_activity(&self, limit: u32) -> Result<Vec<ProcessedRecord>, StoreError>;

    async fn load_rate_state(&self) -> Result<RateState, StoreError>;

    async fn save_rate_state(&self, state: &RateState) -> Result<(), StoreError>;

    /// `None` when the flag was never saved
    async fn load_active(&self) -> Result<Option<bool>, StoreError>;

    async fn save_active(&self, active: bool) -> Result<(), StoreError>;

    /// Add the counters to the stored row of `stats.day`
    async fn add_daily_stats(&self, stats: &DailyStats) -> Result<(), StoreError>;

    /// Stored counters for `day`, zeros when nothing was recorded
    async fn daily_stats(&self, day: NaiveDate) -> Result<DailyStats, StoreError>;
}
