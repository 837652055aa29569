//! One scan-filter-generate-post cycle
//!
//! For every configured subreddit: fetch the newest posts, drop those already
//! in the ledger, apply the filters, pick a product, ask the limiter, compose
//! and submit. The ledger row is written before the limiter advances, so a
//! crash between the two can only make the bot more conservative.
//!
//! A submission that fails after it may have reached the forum is recorded as
//! [`Outcome::Unconfirmed`] and paced like a posted reply. Only failures raised
//! before the request was sent leave the post open for a later cycle.

use crate::compose::ReplyComposer;
use crate::config::BotConfig;
use crate::error::{sanitize_error_message, BotResult};
use crate::forum::{ForumClient, ForumError, Post};
use crate::llm::LlmProvider;
use crate::matcher::{ProductMatch, ProductMatcher};
use crate::observability::metrics::metrics;
use crate::policy::{
    ActiveHours, FilterDecision, PostFilter, RateDecision, RateLimiter, RateState,
};
use crate::store::{DailyStats, Outcome, ProcessedRecord, StateStore};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Why a cycle did not scan anything
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Inactive,
    OutsideActiveHours { local_hour: u32, window: String },
}

/// Why posting stopped before the cycle ran out of posts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateLimitStop {
    Interval { wait_secs: u64 },
    DailyCap { comments_today: u32 },
}

/// A reply produced during the cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplySummary {
    pub post_id: String,
    pub subreddit: String,
    pub title: String,
    pub product_id: String,
    pub outcome: Outcome,
    pub comment_id: Option<String>,
    pub reply: String,
}

/// Counters and outcomes of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Correlates the report with the cycle's log span
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub skipped: Option<SkipReason>,
    pub subreddits_checked: u32,
    pub subreddit_failures: u32,
    /// Unrecorded posts seen by this scan. Filtered and deferred posts are
    /// never recorded, so they count again in every scan that lists them.
    pub posts_analyzed: u32,
    pub posts_already_processed: u32,
    /// Per scan, like `posts_analyzed`
    pub posts_filtered: u32,
    pub posts_unmatched: u32,
    pub posts_selected: u32,
    pub comments_posted: u32,
    pub dry_run_replies: u32,
    pub generation_failures: u32,
    pub post_failures: u32,
    pub rate_limited: Option<RateLimitStop>,
    /// Active hours ended while the cycle was running
    pub window_closed: bool,
    /// Forum-wide error that ended the cycle early
    pub aborted: Option<String>,
    pub replies: Vec<ReplySummary>,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at,
            duration_ms: 0,
            skipped: None,
            subreddits_checked: 0,
            subreddit_failures: 0,
            posts_analyzed: 0,
            posts_already_processed: 0,
            posts_filtered: 0,
            posts_unmatched: 0,
            posts_selected: 0,
            comments_posted: 0,
            dry_run_replies: 0,
            generation_failures: 0,
            post_failures: 0,
            rate_limited: None,
            window_closed: false,
            aborted: None,
            replies: Vec::new(),
        }
    }

    /// Counters to add to the day's stored totals
    pub fn daily_delta(&self, day: NaiveDate) -> DailyStats {
        DailyStats {
            day,
            posts_analyzed: u64::from(self.posts_analyzed),
            posts_filtered: u64::from(self.posts_filtered),
            posts_selected: u64::from(self.posts_selected),
            comments_posted: u64::from(self.comments_posted),
        }
    }
}

/// Whether the cycle moves on after a subreddit or a post
enum Flow {
    Continue,
    Stop,
}

/// Wall-clock time inside a cycle that started at `now`
fn cycle_time(now: DateTime<Utc>, started: Instant) -> DateTime<Utc> {
    let elapsed =
        chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
    now + elapsed
}

pub struct CycleEngine {
    forum: Arc<dyn ForumClient>,
    store: Arc<dyn StateStore>,
    composer: ReplyComposer,
    filter: PostFilter,
    matcher: ProductMatcher,
    hours: ActiveHours,
    limiter: RateLimiter,
    timezone: Tz,
    subreddits: Vec<String>,
    posts_per_subreddit: u32,
    dry_run: bool,
    active: bool,
    cycles_run: u64,
}

impl CycleEngine {
    pub fn new(
        config: &BotConfig,
        forum: Arc<dyn ForumClient>,
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn StateStore>,
        rate_state: RateState,
        active: bool,
    ) -> Self {
        let timezone = config.timezone();
        Self {
            forum,
            store,
            composer: ReplyComposer::new(provider, &config.llm, &config.disclosure),
            filter: PostFilter::new(&config.filters),
            matcher: ProductMatcher::new(
                config.products.clone(),
                config.filters.min_keyword_matches,
            ),
            hours: ActiveHours::new(
                config.schedule.active_hours_start,
                config.schedule.active_hours_end,
                timezone,
            ),
            limiter: RateLimiter::new(
                std::time::Duration::from_secs(config.rate_limit.comment_interval_secs),
                config.rate_limit.max_comments_per_day,
                timezone,
                rate_state,
            ),
            timezone,
            subreddits: config.forum.subreddits.clone(),
            posts_per_subreddit: config.bot.posts_per_subreddit,
            dry_run: config.bot.dry_run,
            active,
            cycles_run: 0,
        }
    }

    /// Build an engine with limiter state and active flag loaded from the store
    pub async fn restore(
        config: &BotConfig,
        forum: Arc<dyn ForumClient>,
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn StateStore>,
    ) -> BotResult<Self> {
        store.migrate().await?;
        let rate_state = store.load_rate_state().await?;
        let active = store
            .load_active()
            .await?
            .unwrap_or(config.bot.start_active);

        info!(
            active,
            dry_run = config.bot.dry_run,
            comments_today = rate_state.comments_today,
            "Restored bot state"
        );
        Ok(Self::new(config, forum, provider, store, rate_state, active))
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn active_hours(&self) -> &ActiveHours {
        &self.hours
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn subreddits(&self) -> &[String] {
        &self.subreddits
    }

    pub fn rate_state(&self) -> &RateState {
        self.limiter.state()
    }

    pub fn comments_today(&self, now: DateTime<Utc>) -> u32 {
        self.limiter.comments_today(now)
    }

    pub fn local_day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    /// Scheduled cycle: does nothing while the bot is inactive
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> BotResult<CycleReport> {
        self.execute(now, true).await
    }

    /// Operator-triggered cycle: ignores the active flag, never the active hours
    pub async fn run_manual(&mut self, now: DateTime<Utc>) -> BotResult<CycleReport> {
        self.execute(now, false).await
    }

    async fn execute(&mut self, now: DateTime<Utc>, honor_active: bool) -> BotResult<CycleReport> {
        let mut report = CycleReport::new(now);

        if honor_active && !self.active {
            debug!("Bot inactive, cycle skipped");
            metrics().cycle_skipped();
            report.skipped = Some(SkipReason::Inactive);
            return Ok(report);
        }

        if !self.hours.is_active(now) {
            let local_hour = self.hours.local_hour(now);
            info!(
                local_hour,
                window = %self.hours.describe(),
                "Outside active hours, cycle skipped"
            );
            metrics().cycle_skipped();
            report.skipped = Some(SkipReason::OutsideActiveHours {
                local_hour,
                window: self.hours.describe(),
            });
            return Ok(report);
        }

        self.cycles_run += 1;
        metrics().cycle_started();
        let started = Instant::now();
        let span = crate::cycle_span!(
            cycle_id = %report.cycle_id,
            cycle = self.cycles_run,
            dry_run = self.dry_run,
            subreddits = self.subreddits.len()
        );

        let result = self
            .scan_all(now, started, &mut report)
            .instrument(span)
            .await;
        let elapsed = started.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;

        if let Err(e) = result {
            metrics().cycle_aborted(elapsed);
            return Err(e);
        }

        if let Err(e) = self
            .store
            .add_daily_stats(&report.daily_delta(self.local_day(now)))
            .await
        {
            warn!(error = %e, "Failed to update daily stats");
        }

        if report.aborted.is_some() {
            metrics().cycle_aborted(elapsed);
        } else {
            metrics().cycle_completed(elapsed);
        }

        info!(
            subreddits_checked = report.subreddits_checked,
            posts_analyzed = report.posts_analyzed,
            posts_filtered = report.posts_filtered,
            posts_selected = report.posts_selected,
            comments_posted = report.comments_posted,
            dry_run_replies = report.dry_run_replies,
            duration_ms = report.duration_ms,
            "Cycle finished"
        );
        Ok(report)
    }

    async fn scan_all(
        &mut self,
        now: DateTime<Utc>,
        started: Instant,
        report: &mut CycleReport,
    ) -> BotResult<()> {
        let subreddits = self.subreddits.clone();
        for subreddit in subreddits {
            report.subreddits_checked += 1;
            let span = crate::subreddit_span!(subreddit = %subreddit);
            if let Flow::Stop = self
                .scan_subreddit(&subreddit, now, started, report)
                .instrument(span)
                .await?
            {
                break;
            }
        }
        Ok(())
    }

    async fn scan_subreddit(
        &mut self,
        subreddit: &str,
        now: DateTime<Utc>,
        started: Instant,
        report: &mut CycleReport,
    ) -> BotResult<Flow> {
        let posts = match self
            .forum
            .fetch_new(subreddit, self.posts_per_subreddit)
            .await
        {
            Ok(posts) => posts,
            Err(e) => {
                metrics().subreddit_failed();
                report.subreddit_failures += 1;
                warn!(subreddit, error = %e, "Failed to fetch subreddit");
                return Ok(Self::after_forum_error(&e, report));
            }
        };

        debug!(subreddit, count = posts.len(), "Fetched posts");
        metrics().posts_scanned(posts.len() as u64);

        for post in posts {
            if self.store.is_processed(&post.id).await? {
                metrics().post_already_processed();
                report.posts_already_processed += 1;
                continue;
            }
            report.posts_analyzed += 1;

            if let FilterDecision::Reject(reason) = self.filter.evaluate(&post, now) {
                metrics().post_filtered(reason.kind());
                report.posts_filtered += 1;
                debug!(post_id = %post.id, reason = %reason, "Post filtered");
                continue;
            }

            let Some(matched) = self.matcher.best_match(&post) else {
                metrics().post_unmatched();
                report.posts_unmatched += 1;
                debug!(post_id = %post.id, "No relevant product");
                continue;
            };

            metrics().post_selected();
            report.posts_selected += 1;
            info!(
                post_id = %post.id,
                product = %matched.product.id,
                score = matched.score,
                title = %post.title,
                "Post selected"
            );

            if self.window_closed(now, started, report) {
                return Ok(Flow::Stop);
            }

            if let Some(stop) = self.rate_limit_stop(now) {
                metrics().rate_limit_deferred();
                info!(post_id = %post.id, limit = ?stop, "Rate limit reached, posting deferred");
                report.rate_limited = Some(stop);
                return Ok(Flow::Stop);
            }

            if let Flow::Stop = self
                .reply_to(&post, &matched, now, started, report)
                .await?
            {
                return Ok(Flow::Stop);
            }
        }

        Ok(Flow::Continue)
    }

    /// Re-check active hours at the current point of a running cycle
    fn window_closed(
        &self,
        now: DateTime<Utc>,
        started: Instant,
        report: &mut CycleReport,
    ) -> bool {
        let current = cycle_time(now, started);
        if self.hours.is_active(current) {
            return false;
        }
        info!(
            local_hour = self.hours.local_hour(current),
            window = %self.hours.describe(),
            "Active hours ended during the cycle, posting stopped"
        );
        report.window_closed = true;
        true
    }

    fn rate_limit_stop(&self, now: DateTime<Utc>) -> Option<RateLimitStop> {
        match self.limiter.check(now) {
            RateDecision::Ready => None,
            RateDecision::Wait(wait) => Some(RateLimitStop::Interval {
                wait_secs: wait.as_secs(),
            }),
            RateDecision::DailyCapReached => Some(RateLimitStop::DailyCap {
                comments_today: self.limiter.comments_today(now),
            }),
        }
    }

    async fn reply_to(
        &mut self,
        post: &Post,
        matched: &ProductMatch,
        now: DateTime<Utc>,
        started: Instant,
        report: &mut CycleReport,
    ) -> BotResult<Flow> {
        let reply = match self.composer.compose(post, matched).await {
            Ok(reply) => reply,
            Err(e) => {
                metrics().generation_failed();
                report.generation_failures += 1;
                warn!(post_id = %post.id, error = %e.public_message(), "Reply generation failed, post skipped");
                return Ok(Flow::Continue);
            }
        };

        // Generation can be slow enough to run past the window
        if self.window_closed(now, started, report) {
            return Ok(Flow::Stop);
        }

        let (outcome, comment_id) = if self.dry_run {
            metrics().dry_run_reply();
            report.dry_run_replies += 1;
            info!(post_id = %post.id, reply = %reply, "[dry run] Reply not submitted");
            (Outcome::DryRun, None)
        } else {
            match self.forum.reply(post, &reply).await {
                Ok(comment) => {
                    metrics().comment_posted();
                    report.comments_posted += 1;
                    info!(
                        post_id = %post.id,
                        comment_id = %comment.id,
                        permalink = comment.permalink.as_deref().unwrap_or(""),
                        "Reply posted"
                    );
                    (Outcome::Posted, Some(comment.id))
                }
                Err(e) if e.may_have_posted() => {
                    metrics().post_failed();
                    report.post_failures += 1;
                    warn!(
                        post_id = %post.id,
                        error = %e,
                        "Reply may have been published, recording post as unconfirmed"
                    );
                    (Outcome::Unconfirmed, None)
                }
                Err(e) => {
                    metrics().post_failed();
                    report.post_failures += 1;
                    warn!(post_id = %post.id, error = %e, "Failed to post reply");
                    return Ok(Self::after_forum_error(&e, report));
                }
            }
        };

        let record = ProcessedRecord {
            post_id: post.id.clone(),
            subreddit: post.subreddit.clone(),
            product_id: matched.product.id.clone(),
            outcome,
            comment_id: comment_id.clone(),
            reply_text: reply.clone(),
            processed_at: now,
        };
        self.store.record_processed(&record).await?;

        self.limiter.record(now);
        self.store.save_rate_state(self.limiter.state()).await?;

        report.replies.push(ReplySummary {
            post_id: post.id.clone(),
            subreddit: post.subreddit.clone(),
            title: post.title.clone(),
            product_id: matched.product.id.clone(),
            outcome,
            comment_id,
            reply,
        });
        Ok(Flow::Continue)
    }

    fn after_forum_error(error: &ForumError, report: &mut CycleReport) -> Flow {
        if error.is_fatal_for_cycle() {
            report.aborted = Some(sanitize_error_message(&error.to_string()));
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}
