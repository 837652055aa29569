//! Active-hours window

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

/// Hours of the local day during which the bot may post
///
/// `start <= hour < end`. When `start > end` the window wraps past midnight,
/// so `22..6` means 22:00 through 05:59.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveHours {
    start: u32,
    end: u32,
    timezone: Tz,
}

impl ActiveHours {
    pub fn new(start: u32, end: u32, timezone: Tz) -> Self {
        Self {
            start,
            end,
            timezone,
        }
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        if self.start <= self.end {
            self.start <= hour && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }

    pub fn local_hour(&self, now: DateTime<Utc>) -> u32 {
        now.with_timezone(&self.timezone).hour()
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.contains_hour(self.local_hour(now))
    }

    pub fn describe(&self) -> String {
        format!("{}h-{}h {}", self.start, self.end, self.timezone.name())
    }
}
