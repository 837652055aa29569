//! SQLite-backed state store

use super::{DailyStats, Outcome, ProcessedRecord, StateStore, StoreError};
use crate::policy::RateState;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const RATE_STATE_KEY: &str = "rate_state";
const ACTIVE_KEY: &str = "active";

#[derive(Debug, sqlx::FromRow)]
struct ProcessedRow {
    post_id: String,
    subreddit: String,
    product_id: String,
    outcome: String,
    comment_id: Option<String>,
    reply_text: String,
    processed_at: String,
}

impl TryFrom<ProcessedRow> for ProcessedRecord {
    type Error = StoreError;

    fn try_from(row: ProcessedRow) -> Result<Self, Self::Error> {
        let corrupt = |message: String| StoreError::Corrupt {
            key: format!("processed_posts/{}", row.post_id),
            message,
        };
        let outcome = Outcome::from_str(&row.outcome).map_err(corrupt)?;
        let processed_at = DateTime::parse_from_rfc3339(&row.processed_at)
            .map_err(|e| corrupt(e.to_string()))?
            .with_timezone(&Utc);

        Ok(Self {
            post_id: row.post_id,
            subreddit: row.subreddit,
            product_id: row.product_id,
            outcome,
            comment_id: row.comment_id,
            reply_text: row.reply_text,
            processed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DailyStatsRow {
    posts_analyzed: i64,
    posts_filtered: i64,
    posts_selected: i64,
    comments_posted: i64,
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and create if missing) the database file at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let full_path = if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(db_path)
        };

        if let Some(parent) = full_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Connection(format!("db dir create error: {e}")))?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(&full_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::Connection(format!("db connect error: {e}")))?;

        info!(path = %full_path.display(), "Opened state database");
        Ok(Self { pool })
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM bot_state WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO bot_state(key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        debug!("State database migrate start");

        let ddls = [
            r#"
            CREATE TABLE IF NOT EXISTS processed_posts(
              post_id TEXT PRIMARY KEY,
              subreddit TEXT NOT NULL,
              product_id TEXT NOT NULL,
              outcome TEXT NOT NULL,
              comment_id TEXT NULL,
              reply_text TEXT NOT NULL,
              processed_at TEXT NOT NULL
            )"#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_processed_posts_processed_at
            ON processed_posts(processed_at)"#,
            r#"
            CREATE TABLE IF NOT EXISTS bot_state(
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS daily_stats(
              day TEXT PRIMARY KEY,
              posts_analyzed INTEGER NOT NULL DEFAULT 0,
              posts_filtered INTEGER NOT NULL DEFAULT 0,
              posts_selected INTEGER NOT NULL DEFAULT 0,
              comments_posted INTEGER NOT NULL DEFAULT 0
            )"#,
        ];

        for ddl in ddls {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(format!("migrate error (ddl): {e}")))?;
        }

        debug!("State database migrate done");
        Ok(())
    }

    async fn is_processed(&self, post_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM processed_posts WHERE post_id = ?1 LIMIT 1")
                .bind(post_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn record_processed(&self, record: &ProcessedRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO processed_posts(
              post_id, subreddit, product_id, outcome, comment_id, reply_text, processed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&record.post_id)
        .bind(&record.subreddit)
        .bind(&record.product_id)
        .bind(record.outcome.as_str())
        .bind(&record.comment_id)
        .bind(&record.reply_text)
        .bind(timestamp(&record.processed_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn recent_activity(&self, limit: u32) -> Result<Vec<ProcessedRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ProcessedRow>(
            r#"
            SELECT post_id, subreddit, product_id, outcome, comment_id, reply_text, processed_at
            FROM processed_posts
            ORDER BY processed_at DESC, rowid DESC
            LIMIT ?1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProcessedRecord::try_from).collect()
    }

    async fn load_rate_state(&self) -> Result<RateState, StoreError> {
        match self.get_value(RATE_STATE_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                key: RATE_STATE_KEY.to_string(),
                message: e.to_string(),
            }),
            None => Ok(RateState::default()),
        }
    }

    async fn save_rate_state(&self, state: &RateState) -> Result<(), StoreError> {
        let raw = serde_json::to_string(state).map_err(|e| StoreError::Corrupt {
            key: RATE_STATE_KEY.to_string(),
            message: e.to_string(),
        })?;
        self.set_value(RATE_STATE_KEY, &raw).await
    }

    async fn load_active(&self) -> Result<Option<bool>, StoreError> {
        match self.get_value(ACTIVE_KEY).await?.as_deref() {
            None => Ok(None),
            Some("true") => Ok(Some(true)),
            Some("false") => Ok(Some(false)),
            Some(other) => Err(StoreError::Corrupt {
                key: ACTIVE_KEY.to_string(),
                message: format!("expected true or false, got '{other}'"),
            }),
        }
    }

    async fn save_active(&self, active: bool) -> Result<(), StoreError> {
        self.set_value(ACTIVE_KEY, if active { "true" } else { "false" })
            .await
    }

    async fn add_daily_stats(&self, stats: &DailyStats) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO daily_stats(day, posts_analyzed, posts_filtered, posts_selected, comments_posted)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(day) DO UPDATE SET
              posts_analyzed = posts_analyzed + excluded.posts_analyzed,
              posts_filtered = posts_filtered + excluded.posts_filtered,
              posts_selected = posts_selected + excluded.posts_selected,
              comments_posted = comments_posted + excluded.comments_posted
            "#,
        )
        .bind(stats.day.to_string())
        .bind(stats.posts_analyzed as i64)
        .bind(stats.posts_filtered as i64)
        .bind(stats.posts_selected as i64)
        .bind(stats.comments_posted as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn daily_stats(&self, day: NaiveDate) -> Result<DailyStats, StoreError> {
        let row = sqlx::query_as::<_, DailyStatsRow>(
            r#"
            SELECT posts_analyzed, posts_filtered, posts_selected, comments_posted
            FROM daily_stats
            WHERE day = ?1
            "#,
        )
        .bind(day.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => DailyStats {
                day,
                posts_analyzed: row.posts_analyzed.max(0) as u64,
                posts_filtered: row.posts_filtered.max(0) as u64,
                posts_selected: row.posts_selected.max(0) as u64,
                comments_posted: row.comments_posted.max(0) as u64,
            },
            None => DailyStats::empty(day),
        })
    }
}
