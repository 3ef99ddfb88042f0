//! Configuration types, built from environment variables.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default model used for reply generation.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Read an env var and parse it, falling back to `default` when unset or malformed.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Split a comma-separated env value into trimmed, non-empty entries.
fn env_list(key: &str, default: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Ingestion loop tuning.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Fixed delay between successful (or transiently failed) polls.
    pub poll_interval: Duration,
    /// Lower bound of the randomized provider-side long-poll timeout, seconds.
    pub long_poll_min_secs: u64,
    /// Upper bound of the randomized provider-side long-poll timeout, seconds.
    pub long_poll_max_secs: u64,
    /// First delay after a conflict.
    pub conflict_base: Duration,
    /// Ceiling for the conflict backoff (before jitter).
    pub conflict_max: Duration,
    /// Maximum extra random delay added to each backoff.
    pub max_jitter: Duration,
    /// Consecutive conflicts tolerated before the poller stands down.
    pub max_conflicts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            long_poll_min_secs: 1,
            long_poll_max_secs: 3,
            conflict_base: Duration::from_secs(5),
            conflict_max: Duration::from_secs(60),
            max_jitter: Duration::from_secs(1),
            max_conflicts: 10,
        }
    }
}

impl PollerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let long_poll_min_secs = env_or("RELAY_POLL_TIMEOUT_MIN_SECS", defaults.long_poll_min_secs);
        let long_poll_max_secs = env_or("RELAY_POLL_TIMEOUT_MAX_SECS", defaults.long_poll_max_secs)
            .max(long_poll_min_secs);
        Self {
            poll_interval: Duration::from_millis(env_or(
                "RELAY_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            long_poll_min_secs,
            long_poll_max_secs,
            conflict_base: Duration::from_secs(env_or(
                "RELAY_CONFLICT_BASE_SECS",
                defaults.conflict_base.as_secs(),
            )),
            conflict_max: Duration::from_secs(env_or(
                "RELAY_CONFLICT_MAX_SECS",
                defaults.conflict_max.as_secs(),
            )),
            max_jitter: defaults.max_jitter,
            max_conflicts: env_or("RELAY_MAX_CONFLICTS", defaults.max_conflicts),
        }
    }
}

/// Telegram bot settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Usernames or numeric ids allowed to talk to the bot; `*` allows everyone.
    pub allowed_users: Vec<String>,
}

impl TelegramConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()))?;
        Ok(Self {
            bot_token: SecretString::from(bot_token),
            allowed_users: env_list("TELEGRAM_ALLOWED_USERS", "*"),
        })
    }
}

/// Reply generator (LLM) settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".into()))?;
        Ok(Self {
            api_key: SecretString::from(api_key),
            model: std::env::var("RELAY_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        })
    }
}

/// IMAP settings for saving drafts.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub drafts_folder: String,
}

impl ImapConfig {
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set (drafting disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("EMAIL_IMAP_HOST").ok()?;
        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = std::env::var("EMAIL_PASSWORD").unwrap_or_default();
        let from_address =
            std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port: env_or("EMAIL_IMAP_PORT", 993),
            username,
            password: SecretString::from(password),
            from_address,
            drafts_folder: std::env::var("EMAIL_DRAFTS_FOLDER")
                .unwrap_or_else(|_| "Drafts".to_string()),
        })
    }
}

/// Whole-process configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub telegram: TelegramConfig,
    pub llm: LlmConfig,
    pub imap: Option<ImapConfig>,
    pub poller: PollerConfig,
    /// Retention window for pending conversations.
    pub state_ttl: Duration,
    /// Upper bound for each reply-generation, draft or send call.
    pub collaborator_timeout: Duration,
    pub http_port: u16,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_port = std::env::var("RELAY_HTTP_PORT").unwrap_or_else(|_| "8080".to_string());
        let http_port = http_port
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                key: "RELAY_HTTP_PORT".into(),
                message: e.to_string(),
            })?;

        Ok(Self {
            telegram: TelegramConfig::from_env()?,
            llm: LlmConfig::from_env()?,
            imap: ImapConfig::from_env(),
            poller: PollerConfig::from_env(),
            state_ttl: Duration::from_secs(env_or("RELAY_STATE_TTL_SECS", 24 * 60 * 60)),
            collaborator_timeout: Duration::from_secs(env_or(
                "RELAY_COLLABORATOR_TIMEOUT_SECS",
                60,
            )),
            http_port,
        })
    }
}
