//! Observability: structured logging, metrics and the status server

pub mod logging;
pub mod metrics;
pub mod status;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};
pub use status::StatusServer;

// Span macros for structured logging
pub use logging::{cycle_span, subreddit_span};
