//! Posting policy: when the bot may act, which posts qualify, and how fast it may comment.

pub mod filter;
pub mod hours;
pub mod rate_limit;

pub use filter::{FilterDecision, PostFilter, RejectReason};
pub use hours::ActiveHours;
pub use rate_limit::{RateDecision, RateLimiter, RateState};
