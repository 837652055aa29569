//! Post eligibility rules

use crate::config::FilterSection;
use crate::forum::Post;
use chrono::{DateTime, Utc};
use std::fmt;

/// Why a post was turned down
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    Locked,
    ScoreTooLow { score: i64, min: i64 },
    TooOld { age_hours: f64, max: u64 },
    ForbiddenKeyword(String),
    Nsfw,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Locked => write!(f, "post is locked or archived"),
            RejectReason::ScoreTooLow { score, min } => {
                write!(f, "score too low: {score} < {min}")
            }
            RejectReason::TooOld { age_hours, max } => {
                write!(f, "post too old: {age_hours:.1}h > {max}h")
            }
            RejectReason::ForbiddenKeyword(keyword) => {
                write!(f, "contains forbidden keyword: {keyword}")
            }
            RejectReason::Nsfw => write!(f, "post is marked NSFW"),
        }
    }
}

impl RejectReason {
    /// Short stable name of the rule, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::Locked => "locked",
            RejectReason::ScoreTooLow { .. } => "score",
            RejectReason::TooOld { .. } => "age",
            RejectReason::ForbiddenKeyword(_) => "forbidden_keyword",
            RejectReason::Nsfw => "nsfw",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    Accept,
    Reject(RejectReason),
}

impl FilterDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FilterDecision::Accept)
    }
}

/// Applies the `[filters]` rules; the first failing rule wins
#[derive(Debug, Clone)]
pub struct PostFilter {
    min_score: i64,
    max_age_hours: u64,
    forbidden_keywords: Vec<String>,
    skip_nsfw: bool,
}

impl PostFilter {
    pub fn new(section: &FilterSection) -> Self {
        Self {
            min_score: section.min_post_score,
            max_age_hours: section.max_post_age_hours,
            forbidden_keywords: section
                .forbidden_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            skip_nsfw: section.skip_nsfw,
        }
    }

    pub fn evaluate(&self, post: &Post, now: DateTime<Utc>) -> FilterDecision {
        if post.locked || post.archived {
            return FilterDecision::Reject(RejectReason::Locked);
        }

        if post.score < self.min_score {
            return FilterDecision::Reject(RejectReason::ScoreTooLow {
                score: post.score,
                min: self.min_score,
            });
        }

        let age_hours = post.age_hours(now);
        if age_hours > self.max_age_hours as f64 {
            return FilterDecision::Reject(RejectReason::TooOld {
                age_hours,
                max: self.max_age_hours,
            });
        }

        let text = post.searchable_text();
        if let Some(keyword) = self
            .forbidden_keywords
            .iter()
            .find(|k| text.contains(k.as_str()))
        {
            return FilterDecision::Reject(RejectReason::ForbiddenKeyword(keyword.clone()));
        }

        if self.skip_nsfw && post.over_18 {
            return FilterDecision::Reject(RejectReason::Nsfw);
        }

        FilterDecision::Accept
    }
}
