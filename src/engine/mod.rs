//! Cycle engine and the runner that schedules it

pub mod cycle;
pub mod runner;

pub use cycle::{CycleEngine, CycleReport, RateLimitStop, ReplySummary, SkipReason};
pub use runner::{BotRunner, ControlCommand, RunnerHandle, RunnerStatus, SharedStatus};
