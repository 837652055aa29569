//! Periodic driver around the cycle engine
//!
//! The runner owns the engine, so cycles never overlap. Operators talk to it
//! through a [`RunnerHandle`]; the status server reads the shared
//! [`RunnerStatus`] snapshot.

use super::cycle::{CycleEngine, CycleReport};
use crate::clock::Clock;
use crate::error::{BotError, BotResult};
use crate::observability::metrics::metrics;
use crate::store::{DailyStats, StateStore};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Operator commands accepted by the runner
#[derive(Debug)]
pub enum ControlCommand {
    Start,
    Stop,
    RunOnce {
        reply: oneshot::Sender<Result<CycleReport, String>>,
    },
}

/// Point-in-time view of the runner for the status surface
#[derive(Debug, Clone, Serialize)]
pub struct RunnerStatus {
    pub active: bool,
    pub dry_run: bool,
    pub cycle_in_progress: bool,
    pub in_active_hours: bool,
    pub active_hours: String,
    pub subreddits: Vec<String>,
    pub scan_interval_secs: u64,
    pub cycles_run: u64,
    pub comments_today: u32,
    pub last_comment_at: Option<DateTime<Utc>>,
    pub today: DailyStats,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_report: Option<CycleReport>,
    pub last_error: Option<String>,
}

pub type SharedStatus = Arc<RwLock<RunnerStatus>>;

/// Cloneable control side of a running [`BotRunner`]
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    commands: mpsc::Sender<ControlCommand>,
    status: SharedStatus,
}

impl RunnerHandle {
    async fn send(&self, command: ControlCommand) -> BotResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BotError::internal("runner is not running"))
    }

    pub async fn start(&self) -> BotResult<()> {
        self.send(ControlCommand::Start).await
    }

    pub async fn stop(&self) -> BotResult<()> {
        self.send(ControlCommand::Stop).await
    }

    /// Run one cycle now and wait for its report
    pub async fn run_once(&self) -> BotResult<CycleReport> {
        let (reply, response) = oneshot::channel();
        self.send(ControlCommand::RunOnce { reply }).await?;
        response
            .await
            .map_err(|_| BotError::internal("runner dropped the request"))?
            .map_err(BotError::internal)
    }

    pub async fn status(&self) -> RunnerStatus {
        self.status.read().await.clone()
    }

    pub fn shared_status(&self) -> SharedStatus {
        self.status.clone()
    }
}

pub struct BotRunner {
    engine: CycleEngine,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    commands: mpsc::Receiver<ControlCommand>,
    shutdown: watch::Receiver<bool>,
    status: SharedStatus,
    current_day: NaiveDate,
    cycles_run: u64,
}

impl BotRunner {
    pub fn new(
        engine: CycleEngine,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, RunnerHandle) {
        let now = clock.now();
        let current_day = engine.local_day(now);
        let status = Arc::new(RwLock::new(RunnerStatus {
            active: engine.is_active(),
            dry_run: engine.is_dry_run(),
            cycle_in_progress: false,
            in_active_hours: engine.active_hours().is_active(now),
            active_hours: engine.active_hours().describe(),
            subreddits: engine.subreddits().to_vec(),
            scan_interval_secs: interval.as_secs(),
            cycles_run: 0,
            comments_today: engine.comments_today(now),
            last_comment_at: engine.rate_state().last_comment_at,
            today: DailyStats::empty(current_day),
            last_cycle_at: None,
            last_report: None,
            last_error: None,
        }));

        let (tx, rx) = mpsc::channel(16);
        let handle = RunnerHandle {
            commands: tx,
            status: status.clone(),
        };

        let runner = Self {
            engine,
            store,
            clock,
            interval,
            commands: rx,
            shutdown,
            status,
            current_day,
            cycles_run: 0,
        };
        (runner, handle)
    }

    /// Drive cycles until shutdown is signalled or every handle is dropped
    pub async fn run(mut self) -> BotResult<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.load_today().await;
        self.publish_state().await;
        info!(
            interval_secs = self.interval.as_secs(),
            active = self.engine.is_active(),
            "Runner started"
        );

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("Shutdown signal received, stopping runner");
                        break;
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            info!("All runner handles dropped, stopping runner");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if self.engine.is_active() {
                        let _ = self.cycle(false).await;
                    } else {
                        self.roll_day(self.clock.now()).await;
                        self.refresh_status().await;
                    }
                }
            }
        }

        metrics().set_runner_state("stopped");
        Ok(())
    }

    async fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Start => self.set_active(true).await,
            ControlCommand::Stop => self.set_active(false).await,
            ControlCommand::RunOnce { reply } => {
                let result = self.cycle(true).await;
                if reply.send(result).is_err() {
                    warn!("Run-once requester went away before the report was ready");
                }
            }
        }
    }

    async fn set_active(&mut self, active: bool) {
        self.engine.set_active(active);
        if let Err(e) = self.store.save_active(active).await {
            error!(error = %e, "Failed to persist active flag");
        }
        info!(active, "Bot {}", if active { "started" } else { "stopped" });
        self.publish_state().await;
    }

    async fn publish_state(&self) {
        metrics().set_runner_state(if self.engine.is_active() {
            "active"
        } else {
            "inactive"
        });
        self.refresh_status().await;
    }

    /// Reset per-day counters when the local day changes
    async fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = self.engine.local_day(now);
        if today == self.current_day {
            return;
        }

        let finished = self.status.read().await.today;
        info!(
            day = %self.current_day,
            posts_analyzed = finished.posts_analyzed,
            posts_selected = finished.posts_selected,
            comments_posted = finished.comments_posted,
            "Day finished"
        );
        self.current_day = today;
        self.load_today().await;
    }

    async fn load_today(&self) {
        let today = match self.store.daily_stats(self.current_day).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Failed to load daily stats");
                DailyStats::empty(self.current_day)
            }
        };
        self.status.write().await.today = today;
    }

    async fn cycle(&mut self, manual: bool) -> Result<CycleReport, String> {
        let now = self.clock.now();
        self.roll_day(now).await;
        self.status.write().await.cycle_in_progress = true;

        let result = if manual {
            self.engine.run_manual(now).await
        } else {
            self.engine.run_cycle(now).await
        };

        if result.as_ref().is_ok_and(|r| r.skipped.is_none()) {
            self.cycles_run += 1;
        }
        self.load_today().await;

        let mut status = self.status.write().await;
        status.cycle_in_progress = false;
        status.last_cycle_at = Some(now);
        let result = match result {
            Ok(report) => {
                status.last_report = Some(report.clone());
                status.last_error = report.aborted.clone();
                Ok(report)
            }
            Err(e) => {
                let message = e.public_message();
                error!(error = %message, "Cycle failed");
                status.last_error = Some(message.clone());
                Err(message)
            }
        };
        drop(status);

        self.refresh_status().await;
        result
    }

    async fn refresh_status(&self) {
        let now = self.clock.now();
        let mut status = self.status.write().await;
        status.active = self.engine.is_active();
        status.in_active_hours = self.engine.active_hours().is_active(now);
        status.comments_today = self.engine.comments_today(now);
        status.last_comment_at = self.engine.rate_state().last_comment_at;
        status.cycles_run = self.cycles_run;
    }
}
