//! Mock implementations for testing

use crate::forum::{ForumClient, ForumError, Post, PostedComment};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
};
use crate::policy::RateState;
use crate::store::{DailyStats, ProcessedRecord, StateStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Build a post that passes the default filters at `now`
pub fn sample_post(id: &str, subreddit: &str, title: &str, created_at: DateTime<Utc>) -> Post {
    Post {
        id: id.to_string(),
        fullname: format!("t3_{id}"),
        subreddit: subreddit.to_string(),
        title: title.to_string(),
        selftext: String::new(),
        author: Some("poster".to_string()),
        permalink: format!("/r/{subreddit}/comments/{id}/"),
        url: None,
        score: 10,
        created_at,
        over_18: false,
        locked: false,
        archived: false,
    }
}

/// Mock forum with canned listings per subreddit
#[derive(Debug, Clone, Default)]
pub struct MockForum {
    pub listings: Arc<Mutex<HashMap<String, Vec<Post>>>>,
    pub fetch_errors: Arc<Mutex<HashMap<String, ForumError>>>,
    pub reply_error: Arc<Mutex<Option<ForumError>>>,
    pub replies: Arc<Mutex<Vec<(String, String)>>>,
    pub fetches: Arc<Mutex<Vec<String>>>,
    pub fetch_delay: Arc<Mutex<Option<std::time::Duration>>>,
}

impl MockForum {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_posts(&self, subreddit: &str, posts: Vec<Post>) {
        self.listings
            .lock()
            .await
            .entry(subreddit.to_string())
            .or_default()
            .extend(posts);
    }

    pub async fn fail_fetch(&self, subreddit: &str, error: ForumError) {
        self.fetch_errors
            .lock()
            .await
            .insert(subreddit.to_string(), error);
    }

    /// Make every listing request take at least `delay`
    pub async fn slow_fetches(&self, delay: std::time::Duration) {
        *self.fetch_delay.lock().await = Some(delay);
    }

    pub async fn fail_replies(&self, error: ForumError) {
        *self.reply_error.lock().await = Some(error);
    }

    /// `(post fullname, text)` of every accepted reply
    pub async fn get_replies(&self) -> Vec<(String, String)> {
        self.replies.lock().await.clone()
    }

    pub async fn get_fetches(&self) -> Vec<String> {
        self.fetches.lock().await.clone()
    }
}

#[async_trait]
impl ForumClient for MockForum {
    async fn identity(&self) -> Result<String, ForumError> {
        Ok("mock_user".to_string())
    }

    async fn fetch_new(&self, subreddit: &str, limit: u32) -> Result<Vec<Post>, ForumError> {
        self.fetches.lock().await.push(subreddit.to_string());

        let delay = *self.fetch_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.fetch_errors.lock().await.get(subreddit) {
            return Err(error.clone());
        }

        let listings = self.listings.lock().await;
        Ok(listings
            .get(subreddit)
            .map(|posts| posts.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn reply(&self, post: &Post, text: &str) -> Result<PostedComment, ForumError> {
        if let Some(error) = self.reply_error.lock().await.clone() {
            return Err(error);
        }

        let mut replies = self.replies.lock().await;
        replies.push((post.fullname.clone(), text.to_string()));
        Ok(PostedComment {
            id: format!("c{}", replies.len()),
            permalink: Some(format!("{}c{}/", post.permalink, replies.len())),
        })
    }
}

/// Mock LLM provider for testing
#[derive(Debug, Clone)]
pub struct MockLlmProvider {
    pub responses: Vec<String>,
    pub current_response: Arc<Mutex<usize>>,
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
    pub should_fail: bool,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            current_response: Arc::new(Mutex::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            should_fail: false,
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .try_lock()
            .map(|requests| requests.len())
            .unwrap_or_default()
    }

    pub async fn get_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().await.push(request);

        if self.should_fail {
            return Err(LlmError::RequestFailed("Mock LLM failure".to_string()));
        }

        let mut current = self.current_response.lock().await;
        let response_idx = *current % self.responses.len().max(1);
        *current += 1;

        let content = if self.responses.is_empty() {
            "Mock response".to_string()
        } else {
            self.responses[response_idx].clone()
        };

        Ok(CompletionResponse {
            content: Some(content),
            model: "mock-model".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: FinishReason::Stop,
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.should_fail {
            Err(LlmError::RequestFailed(
                "Mock health check failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    processed: Vec<ProcessedRecord>,
    rate_state: RateState,
    active: Option<bool>,
    daily: HashMap<NaiveDate, DailyStats>,
}

/// In-memory [`StateStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    pub should_fail: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.should_fail {
            Err(StoreError::Query("Mock store failure".to_string()))
        } else {
            Ok(())
        }
    }

    pub async fn processed(&self) -> Vec<ProcessedRecord> {
        self.state.lock().await.processed.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn is_processed(&self, post_id: &str) -> Result<bool, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.processed.iter().any(|r| r.post_id == post_id))
    }

    async fn record_processed(&self, record: &ProcessedRecord) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        if state.processed.iter().any(|r| r.post_id == record.post_id) {
            return Ok(false);
        }
        state.processed.push(record.clone());
        Ok(true)
    }

    async fn recent_activity(&self, limit: u32) -> Result<Vec<ProcessedRecord>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        let mut records = state.processed.clone();
        records.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn load_rate_state(&self) -> Result<RateState, StoreError> {
        self.check()?;
        Ok(self.state.lock().await.rate_state.clone())
    }

    async fn save_rate_state(&self, rate_state: &RateState) -> Result<(), StoreError> {
        self.check()?;
        self.state.lock().await.rate_state = rate_state.clone();
        Ok(())
    }

    async fn load_active(&self) -> Result<Option<bool>, StoreError> {
        self.check()?;
        Ok(self.state.lock().await.active)
    }

    async fn save_active(&self, active: bool) -> Result<(), StoreError> {
        self.check()?;
        self.state.lock().await.active = Some(active);
        Ok(())
    }

    async fn add_daily_stats(&self, stats: &DailyStats) -> Result<(), StoreError> {
        self.check()?;
        self.state
            .lock()
            .await
            .daily
            .entry(stats.day)
            .or_insert_with(|| DailyStats::empty(stats.day))
            .merge(stats);
        Ok(())
    }

    async fn daily_stats(&self, day: NaiveDate) -> Result<DailyStats, StoreError> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .await
            .daily
            .get(&day)
            .copied()
            .unwrap_or_else(|| DailyStats::empty(day)))
    }
}
