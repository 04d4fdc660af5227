use serde::Deserialize;
use std::time::Duration;

use crate::AppError;

/// Global application settings loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Telegram bot API token.
    pub bot_token: String,

    /// Path of the SQLite database file.
    pub database_path: String,

    /// Number of long-lived connections kept in the storage pool.
    pub pool_size: usize,

    /// Port for the API server.
    pub api_port: u16,

    /// Upper bound on processing one webhook update, in seconds.
    pub webhook_timeout_secs: u64,

    /// How often the janitor prunes usage samples, in seconds.
    pub cleanup_interval_secs: u64,
}

impl Settings {
    /// Load settings from environment variables (with optional `.env` file).
    pub fn from_env() -> eyre::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key/value source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> eyre::Result<Self> {
        let bot_token = var("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if bot_token.trim().is_empty() {
            return Err(AppError::Config("TELEGRAM_BOT_TOKEN is not set".into()).into());
        }

        let settings = Self {
            bot_token,
            database_path: var("DATABASE_PATH").unwrap_or_else(|| "bot_database.db".into()),
            pool_size: var("POOL_SIZE").unwrap_or_else(|| "20".into()).parse()?,
            api_port: var("API_PORT").unwrap_or_else(|| "8000".into()).parse()?,
            webhook_timeout_secs: var("WEBHOOK_TIMEOUT_SECS")
                .unwrap_or_else(|| "8".into())
                .parse()?,
            cleanup_interval_secs: var("CLEANUP_INTERVAL_SECS")
                .unwrap_or_else(|| "3600".into())
                .parse()?,
        };

        if settings.pool_size == 0 {
            return Err(AppError::Config("POOL_SIZE must be at least 1".into()).into());
        }
        if settings.webhook_timeout_secs == 0 || settings.cleanup_interval_secs == 0 {
            return Err(AppError::Config("timeouts and intervals must be at least 1s".into()).into());
        }

        Ok(settings)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
