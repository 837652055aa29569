//! Bot configuration
//!
//! Loaded from a TOML file. Secrets never live in the file itself: the file
//! names the environment variables that hold them and they are resolved at
//! runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotConfig {
    #[serde(default)]
    pub bot: BotSection,
    pub forum: ForumSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub filters: FilterSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    pub llm: LlmSection,
    pub disclosure: DisclosureSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub status: StatusSection,
    #[serde(default)]
    pub products: Vec<ProductConfig>,
}

/// General bot behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotSection {
    #[serde(default = "default_bot_name")]
    pub name: String,
    /// Log replies instead of submitting them
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    /// Seconds between two scan cycles
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    /// Number of newest posts fetched per subreddit and cycle
    #[serde(default = "default_posts_per_subreddit")]
    pub posts_per_subreddit: u32,
    /// Start scanning as soon as the runner is up
    #[serde(default)]
    pub start_active: bool,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            dry_run: default_dry_run(),
            scan_interval_secs: default_scan_interval(),
            posts_per_subreddit: default_posts_per_subreddit(),
            start_active: false,
        }
    }
}

fn default_bot_name() -> String {
    "subreply".to_string()
}

fn default_dry_run() -> bool {
    true
}

fn default_scan_interval() -> u64 {
    60
}

fn default_posts_per_subreddit() -> u32 {
    20
}

/// Forum account and endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForumSection {
    pub subreddits: Vec<String>,
    #[serde(default = "default_client_id_env")]
    pub client_id_env: String,
    #[serde(default = "default_client_secret_env")]
    pub client_secret_env: String,
    #[serde(default = "default_username_env")]
    pub username_env: String,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_forum_timeout")]
    pub timeout_secs: u64,
}

fn default_client_id_env() -> String {
    "REDDIT_CLIENT_ID".to_string()
}

fn default_client_secret_env() -> String {
    "REDDIT_CLIENT_SECRET".to_string()
}

fn default_username_env() -> String {
    "REDDIT_USERNAME".to_string()
}

fn default_password_env() -> String {
    "REDDIT_PASSWORD".to_string()
}

fn default_user_agent() -> String {
    format!("subreply/{}", env!("CARGO_PKG_VERSION"))
}

fn default_auth_url() -> String {
    "https://www.reddit.com/api/v1/access_token".to_string()
}

fn default_api_url() -> String {
    "https://oauth.reddit.com".to_string()
}

fn default_forum_timeout() -> u64 {
    30
}

/// Active hours window, evaluated in `timezone`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleSection {
    #[serde(default = "default_active_start")]
    pub active_hours_start: u32,
    #[serde(default = "default_active_end")]
    pub active_hours_end: u32,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            active_hours_start: default_active_start(),
            active_hours_end: default_active_end(),
            timezone: default_timezone(),
        }
    }
}

fn default_active_start() -> u32 {
    9
}

fn default_active_end() -> u32 {
    22
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Post eligibility rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterSection {
    #[serde(default = "default_min_score")]
    pub min_post_score: i64,
    #[serde(default = "default_max_age_hours")]
    pub max_post_age_hours: u64,
    #[serde(default = "default_forbidden_keywords")]
    pub forbidden_keywords: Vec<String>,
    #[serde(default = "default_skip_nsfw")]
    pub skip_nsfw: bool,
    /// Minimum number of product keywords a post must mention
    #[serde(default = "default_min_keyword_matches")]
    pub min_keyword_matches: usize,
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            min_post_score: default_min_score(),
            max_post_age_hours: default_max_age_hours(),
            forbidden_keywords: default_forbidden_keywords(),
            skip_nsfw: default_skip_nsfw(),
            min_keyword_matches: default_min_keyword_matches(),
        }
    }
}

fn default_min_score() -> i64 {
    5
}

fn default_max_age_hours() -> u64 {
    12
}

fn default_forbidden_keywords() -> Vec<String> {
    vec![
        "nsfw".to_string(),
        "politics".to_string(),
        "religion".to_string(),
    ]
}

fn default_skip_nsfw() -> bool {
    true
}

fn default_min_keyword_matches() -> usize {
    1
}

/// Per-account comment pacing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitSection {
    #[serde(default = "default_comment_interval")]
    pub comment_interval_secs: u64,
    #[serde(default = "default_max_comments_per_day")]
    pub max_comments_per_day: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            comment_interval_secs: default_comment_interval(),
            max_comments_per_day: default_max_comments_per_day(),
        }
    }
}

fn default_comment_interval() -> u64 {
    300
}

fn default_max_comments_per_day() -> u32 {
    20
}

/// Language model provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    /// Provider name ("openai" or "anthropic")
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable containing the API key
    pub api_key_env: String,
    /// Override the provider's API base URL
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Upper bound on the generated text before the disclosure is appended
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    150
}

fn default_max_reply_chars() -> usize {
    1500
}

/// Line appended to every reply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisclosureSection {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "subreply.db".to_string()
}

/// Status HTTP server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSection {
    #[serde(default = "default_status_port")]
    pub port: u16,
    /// Environment variable holding the key required by control routes
    pub api_key_env: Option<String>,
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            port: default_status_port(),
            api_key_env: None,
        }
    }
}

fn default_status_port() -> u16 {
    8080
}

/// A product the bot may mention
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub url: String,
    pub keywords: Vec<String>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid subreddit name: {0}")]
    InvalidSubreddit(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BotConfig {
    /// Load configuration from a TOML file, apply environment overrides and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse, apply environment overrides and validate
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: BotConfig = toml::from_str(content)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SUBREPLY_DRY_RUN` and `SUBREPLY_SUBREDDITS` over file values
    ///
    /// An unrecognized `SUBREPLY_DRY_RUN` value is an error rather than a
    /// silent switch to live posting.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SUBREPLY_DRY_RUN") {
            self.bot.dry_run = parse_flag(&value).ok_or_else(|| {
                ConfigError::InvalidConfig(format!(
                    "SUBREPLY_DRY_RUN must be true or false, got '{}'",
                    value.trim()
                ))
            })?;
        }
        if let Some(value) = lookup("SUBREPLY_SUBREDDITS") {
            let subs: Vec<String> = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !subs.is_empty() {
                self.forum.subreddits = subs;
            }
        }
        Ok(())
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forum.subreddits.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one subreddit is required".to_string(),
            ));
        }
        for sub in &self.forum.subreddits {
            validate_subreddit(sub)?;
        }

        let schedule = &self.schedule;
        if schedule.active_hours_start > 23 || schedule.active_hours_end > 23 {
            return Err(ConfigError::InvalidConfig(
                "active hours must be between 0 and 23".to_string(),
            ));
        }
        if schedule.active_hours_start == schedule.active_hours_end {
            return Err(ConfigError::InvalidConfig(
                "active_hours_start and active_hours_end must differ".to_string(),
            ));
        }
        schedule.timezone.parse::<chrono_tz::Tz>().map_err(|_| {
            ConfigError::InvalidConfig(format!("unknown timezone '{}'", schedule.timezone))
        })?;

        if self.rate_limit.comment_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "comment_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.bot.scan_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "scan_interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.disclosure.text.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "disclosure text must not be empty".to_string(),
            ));
        }

        match self.llm.provider.as_str() {
            "openai" | "anthropic" => {}
            other => {
                return Err(ConfigError::InvalidConfig(format!(
                    "unsupported LLM provider '{other}'"
                )))
            }
        }

        self.validate_products()
    }

    fn validate_products(&self) -> Result<(), ConfigError> {
        if self.products.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one [[products]] entry is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for product in &self.products {
            if !seen.insert(product.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate product id '{}'",
                    product.id
                )));
            }
            url::Url::parse(&product.url).map_err(|e| {
                ConfigError::InvalidConfig(format!("product '{}' url: {e}", product.id))
            })?;
            if product.keywords.iter().all(|k| k.trim().is_empty()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "product '{}' needs at least one keyword",
                    product.id
                )));
            }
        }
        Ok(())
    }

    /// Parsed timezone for the active-hours window
    pub fn timezone(&self) -> chrono_tz::Tz {
        self.schedule.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Resolve forum credentials from the environment
    pub fn forum_credentials(&self) -> Result<ForumCredentials, ConfigError> {
        Ok(ForumCredentials {
            client_id: Self::get_env_var_required(&self.forum.client_id_env)?,
            client_secret: Self::get_env_var_required(&self.forum.client_secret_env)?,
            username: Self::get_env_var_required(&self.forum.username_env)?,
            password: Self::get_env_var_required(&self.forum.password_env)?,
        })
    }

    /// Get LLM API key from environment variable
    pub fn get_llm_api_key(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.llm.api_key_env)
    }

    /// Key guarding the control routes
    ///
    /// `None` only when `[status].api_key_env` is not set. A configured but
    /// missing or empty variable is an error so the routes never fall back to
    /// running without a key.
    pub fn status_api_key(&self) -> Result<Option<String>, ConfigError> {
        let Some(name) = self.status.api_key_env.as_deref() else {
            return Ok(None);
        };
        let key = Self::get_env_var_required(name)?;
        if key.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "status API key variable {name} is empty"
            )));
        }
        Ok(Some(key))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        toml::from_str(TEST_CONFIG).expect("Test config should parse")
    }
}

#[cfg(test)]
pub(crate) const TEST_CONFIG: &str = r#"
[bot]
dry_run = true

[forum]
subreddits = ["rust", "learnprogramming"]

[llm]
provider = "openai"
api_key_env = "OPENAI_API_KEY"

[disclosure]
text = "Automated reply from the Ferrous team."

[[products]]
id = "ferrous-lint"
name = "Ferrous Lint"
description = "A linter for Rust projects"
url = "https://example.com/ferrous-lint"
keywords = ["linter", "clippy", "lint"]
"#;

/// Forum account secrets resolved from the environment
#[derive(Clone, PartialEq)]
pub struct ForumCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ForumCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForumCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Subreddit names are 2-21 characters of letters, digits and underscores
/// Boolean environment values: true/false, yes/no, 1/0
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn validate_subreddit(name: &str) -> Result<(), ConfigError> {
    let valid_chars = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !(2..=21).contains(&name.len()) || !valid_chars {
        return Err(ConfigError::InvalidSubreddit(format!(
            "'{name}' must match [A-Za-z0-9_]{{2,21}}"
        )));
    }
    Ok(())
}
