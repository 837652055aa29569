//! Thread-safe metrics collection
//!
//! Atomic counters for the hot path and mutex-protected collections for
//! cycle timings and per-reason rejection counts.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cycle durations kept for percentile calculation
const MAX_DURATION_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

pub struct MetricsCollector {
    // Cycles
    cycles_started: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_skipped: AtomicU64,
    cycles_aborted: AtomicU64,
    last_cycle_at: AtomicU64,
    cycle_durations: Mutex<Vec<u64>>, // milliseconds

    // Posts
    posts_scanned: AtomicU64,
    posts_already_processed: AtomicU64,
    posts_filtered: AtomicU64,
    posts_unmatched: AtomicU64,
    posts_selected: AtomicU64,
    rejections: Mutex<HashMap<String, u64>>,

    // Replies
    comments_posted: AtomicU64,
    dry_run_replies: AtomicU64,
    generation_failures: AtomicU64,
    post_failures: AtomicU64,
    subreddit_failures: AtomicU64,
    rate_limit_deferrals: AtomicU64,

    // Lifecycle
    runner_state: Mutex<String>,
    state_transitions: AtomicU64,
    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            cycles_started: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
            cycles_aborted: AtomicU64::new(0),
            last_cycle_at: AtomicU64::new(0),
            cycle_durations: Mutex::new(Vec::new()),
            posts_scanned: AtomicU64::new(0),
            posts_already_processed: AtomicU64::new(0),
            posts_filtered: AtomicU64::new(0),
            posts_unmatched: AtomicU64::new(0),
            posts_selected: AtomicU64::new(0),
            rejections: Mutex::new(HashMap::new()),
            comments_posted: AtomicU64::new(0),
            dry_run_replies: AtomicU64::new(0),
            generation_failures: AtomicU64::new(0),
            post_failures: AtomicU64::new(0),
            subreddit_failures: AtomicU64::new(0),
            rate_limit_deferrals: AtomicU64::new(0),
            runner_state: Mutex::new("stopped".to_string()),
            state_transitions: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Cycle metrics
    pub fn cycle_started(&self) {
        self.cycles_started.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_at
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn cycle_completed(&self, duration: Duration) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.record_cycle_duration(duration);
    }

    /// Cycle ended early on a forum-wide error
    pub fn cycle_aborted(&self, duration: Duration) {
        self.cycles_aborted.fetch_add(1, Ordering::Relaxed);
        self.record_cycle_duration(duration);
    }

    /// Cycle not run because the bot is inactive or outside active hours
    pub fn cycle_skipped(&self) {
        self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cycle_duration(&self, duration: Duration) {
        if let Ok(mut times) = self.cycle_durations.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_DURATION_SAMPLES {
                times.remove(0);
            }
        }
    }

    // Post metrics
    pub fn posts_scanned(&self, count: u64) {
        self.posts_scanned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn post_already_processed(&self) {
        self.posts_already_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn post_filtered(&self, reason: &str) {
        self.posts_filtered.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut rejections) = self.rejections.lock() {
            *rejections.entry(reason.to_string()).or_insert(0) += 1;
        }
    }

    pub fn post_unmatched(&self) {
        self.posts_unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn post_selected(&self) {
        self.posts_selected.fetch_add(1, Ordering::Relaxed);
    }

    // Reply metrics
    pub fn comment_posted(&self) {
        self.comments_posted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dry_run_reply(&self) {
        self.dry_run_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generation_failed(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn post_failed(&self) {
        self.post_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subreddit_failed(&self) {
        self.subreddit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_limit_deferred(&self) {
        self.rate_limit_deferrals.fetch_add(1, Ordering::Relaxed);
    }

    // Lifecycle metrics
    pub fn set_runner_state(&self, state: &str) {
        if let Ok(mut current_state) = self.runner_state.lock() {
            if *current_state != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current_state = state.to_string();
            }
        }
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.cycles_started,
            &self.cycles_completed,
            &self.cycles_skipped,
            &self.cycles_aborted,
            &self.last_cycle_at,
            &self.posts_scanned,
            &self.posts_already_processed,
            &self.posts_filtered,
            &self.posts_unmatched,
            &self.posts_selected,
            &self.comments_posted,
            &self.dry_run_replies,
            &self.generation_failures,
            &self.post_failures,
            &self.subreddit_failures,
            &self.rate_limit_deferrals,
            &self.state_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);

        if let Ok(mut times) = self.cycle_durations.lock() {
            times.clear();
        }
        if let Ok(mut rejections) = self.rejections.lock() {
            rejections.clear();
        }
        if let Ok(mut state) = self.runner_state.lock() {
            *state = "stopped".to_string();
        }
    }

    /// Average and p50/p95/p99 of recorded cycle durations
    fn cycle_duration_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.cycle_durations.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();

        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (
            avg,
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95, p99) = self.cycle_duration_statistics();

        MetricsSnapshot {
            cycles: CycleMetrics {
                started: self.cycles_started.load(Ordering::Relaxed),
                completed: self.cycles_completed.load(Ordering::Relaxed),
                skipped: self.cycles_skipped.load(Ordering::Relaxed),
                aborted: self.cycles_aborted.load(Ordering::Relaxed),
                last_cycle_at: self.last_cycle_at.load(Ordering::Relaxed),
                avg_duration_ms: avg,
                duration_p50_ms: p50,
                duration_p95_ms: p95,
                duration_p99_ms: p99,
            },
            posts: PostMetrics {
                scanned: self.posts_scanned.load(Ordering::Relaxed),
                already_processed: self.posts_already_processed.load(Ordering::Relaxed),
                filtered: self.posts_filtered.load(Ordering::Relaxed),
                unmatched: self.posts_unmatched.load(Ordering::Relaxed),
                selected: self.posts_selected.load(Ordering::Relaxed),
                rejections: self
                    .rejections
                    .lock()
                    .map(|r| r.clone())
                    .unwrap_or_default(),
            },
            replies: ReplyMetrics {
                comments_posted: self.comments_posted.load(Ordering::Relaxed),
                dry_run_replies: self.dry_run_replies.load(Ordering::Relaxed),
                generation_failures: self.generation_failures.load(Ordering::Relaxed),
                post_failures: self.post_failures.load(Ordering::Relaxed),
                subreddit_failures: self.subreddit_failures.load(Ordering::Relaxed),
                rate_limit_deferrals: self.rate_limit_deferrals.load(Ordering::Relaxed),
            },
            lifecycle: LifecycleMetrics {
                runner_state: self
                    .runner_state
                    .lock()
                    .map(|s| s.clone())
                    .unwrap_or_else(|_| "unknown".to_string()),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub cycles: CycleMetrics,
    pub posts: PostMetrics,
    pub replies: ReplyMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct CycleMetrics {
    pub started: u64,
    pub completed: u64,
    pub skipped: u64,
    pub aborted: u64,
    pub last_cycle_at: u64,
    pub avg_duration_ms: f64,
    pub duration_p50_ms: f64,
    pub duration_p95_ms: f64,
    pub duration_p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct PostMetrics {
    pub scanned: u64,
    pub already_processed: u64,
    pub filtered: u64,
    pub unmatched: u64,
    pub selected: u64,
    /// Filter rejections keyed by rule
    pub rejections: HashMap<String, u64>,
}

#[derive(Debug, Serialize)]
pub struct ReplyMetrics {
    pub comments_posted: u64,
    pub dry_run_replies: u64,
    pub generation_failures: u64,
    pub post_failures: u64,
    pub subreddit_failures: u64,
    pub rate_limit_deferrals: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub runner_state: String,
    pub state_transitions: u64,
    pub uptime_seconds: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;
        lower_value + (upper_value - lower_value) * index.fract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_cycle_metrics() {
        let collector = MetricsCollector::new();

        collector.cycle_started();
        collector.cycle_completed(Duration::from_millis(1500));
        collector.cycle_skipped();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.cycles.started, 1);
        assert_eq!(metrics.cycles.completed, 1);
        assert_eq!(metrics.cycles.skipped, 1);
        assert!(metrics.cycles.last_cycle_at > 0);
        assert!(metrics.cycles.avg_duration_ms > 1400.0);
    }

    #[test]
    fn test_rejections_by_reason() {
        let collector = MetricsCollector::new();

        collector.post_filtered("score");
        collector.post_filtered("score");
        collector.post_filtered("nsfw");

        let metrics = collector.get_metrics();
        assert_eq!(metrics.posts.filtered, 3);
        assert_eq!(metrics.posts.rejections.get("score"), Some(&2));
        assert_eq!(metrics.posts.rejections.get("nsfw"), Some(&1));
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.posts_scanned(1);
                        collector.comment_posted();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = collector.get_metrics();
        assert_eq!(metrics.posts.scanned, 1000);
        assert_eq!(metrics.replies.comments_posted, 1000);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        let p50 = percentile(&data, 50.0);
        let p95 = percentile(&data, 95.0);

        assert!((p50 - 5.5).abs() < 0.1, "P50: expected ~5.5, got {p50}");
        assert!((p95 - 9.55).abs() < 0.1, "P95: expected ~9.55, got {p95}");
        assert_eq!(percentile(&data, 0.0), 1.0);
        assert_eq!(percentile(&data, 100.0), 10.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_duration_samples_bounded() {
        let collector = MetricsCollector::new();
        for i in 0..1500 {
            collector.cycle_completed(Duration::from_millis(i));
        }

        assert_eq!(
            collector.cycle_durations.lock().unwrap().len(),
            MAX_DURATION_SAMPLES
        );
    }

    #[test]
    fn test_runner_state_transitions() {
        let collector = MetricsCollector::new();
        collector.set_runner_state("running");
        collector.set_runner_state("running");
        collector.set_runner_state("stopped");

        let metrics = collector.get_metrics();
        assert_eq!(metrics.lifecycle.state_transitions, 2);
        assert_eq!(metrics.lifecycle.runner_state, "stopped");
    }

    #[test]
    fn test_reset() {
        let collector = MetricsCollector::new();
        collector.cycle_started();
        collector.post_filtered("locked");
        collector.set_runner_state("running");

        collector.reset();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.cycles.started, 0);
        assert!(metrics.posts.rejections.is_empty());
        assert_eq!(metrics.lifecycle.runner_state, "stopped");
    }
}
