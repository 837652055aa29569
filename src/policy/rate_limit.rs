//! Per-account comment pacing
//!
//! Two limits apply: a minimum gap between consecutive comments and a cap on
//! comments per local calendar day. The state is small and serializable so
//! the store can persist it and a restart does not reset the pacing.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Persisted limiter state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateState {
    pub last_comment_at: Option<DateTime<Utc>>,
    pub day: Option<NaiveDate>,
    pub comments_today: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RateDecision {
    Ready,
    Wait(Duration),
    DailyCapReached,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: chrono::Duration,
    daily_cap: u32,
    timezone: Tz,
    state: RateState,
}

impl RateLimiter {
    /// `daily_cap` of zero disables the daily cap
    pub fn new(interval: Duration, daily_cap: u32, timezone: Tz, state: RateState) -> Self {
        let interval =
            chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            interval,
            daily_cap,
            timezone,
            state,
        }
    }

    pub fn state(&self) -> &RateState {
        &self.state
    }

    fn local_day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    /// Comments counted against `now`'s local day
    pub fn comments_today(&self, now: DateTime<Utc>) -> u32 {
        if self.state.day == Some(self.local_day(now)) {
            self.state.comments_today
        } else {
            0
        }
    }

    pub fn check(&self, now: DateTime<Utc>) -> RateDecision {
        if self.daily_cap > 0 && self.comments_today(now) >= self.daily_cap {
            return RateDecision::DailyCapReached;
        }

        if let Some(last) = self.state.last_comment_at {
            let next_allowed = last + self.interval;
            if now < next_allowed {
                let wait = (next_allowed - now).to_std().unwrap_or(Duration::ZERO);
                return RateDecision::Wait(wait);
            }
        }

        RateDecision::Ready
    }

    pub fn record(&mut self, now: DateTime<Utc>) {
        let today = self.local_day(now);
        if self.state.day != Some(today) {
            self.state.day = Some(today);
            self.state.comments_today = 0;
        }
        self.state.comments_today += 1;
        self.state.last_comment_at = Some(now);
    }
}
