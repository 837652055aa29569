//! subreply - transparent subreddit reply bot
//!
//! Scans configured subreddits on a schedule, filters posts, matches them
//! against a product catalogue and drafts a reply with an LLM. Every reply
//! carries a fixed disclosure line. Posting is paced per account, limited to
//! active hours and recorded so no post is ever answered twice.
//!
//! # Overview
//!
//! - [`forum`]: Reddit OAuth client behind the [`ForumClient`] trait
//! - [`policy`]: post filters, active hours and comment pacing
//! - [`matcher`] and [`compose`]: product selection and reply drafting
//! - [`store`]: SQLite ledger of processed posts, pacing state and daily stats
//! - [`engine`]: one scan cycle and the periodic runner around it
//! - [`observability`]: logging, metrics and the status server
//!
//! # Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use subreply::policy::ActiveHours;
//!
//! // Overnight window evaluated in Berlin time
//! let hours = ActiveHours::new(22, 6, chrono_tz::Europe::Berlin);
//! let midnight_utc = Utc.with_ymd_and_hms(2024, 1, 15, 23, 0, 0).unwrap();
//! assert!(hours.is_active(midnight_utc));
//! ```

pub mod clock;
pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod forum;
pub mod llm;
pub mod matcher;
pub mod observability;
pub mod policy;
pub mod store;
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use config::{BotConfig, ConfigError};
pub use engine::{BotRunner, CycleEngine, CycleReport, RunnerHandle, RunnerStatus};
pub use error::{BotError, BotResult};
pub use forum::{ForumClient, ForumError, Post, RedditClient};
pub use llm::LlmProvider;
pub use store::{SqliteStore, StateStore};
