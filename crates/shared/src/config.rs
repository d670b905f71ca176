//! Environment-driven configuration

use std::path::PathBuf;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Runtime configuration for the billing engine and its worker
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    /// Account that inherits the financial records of reclaimed accounts
    pub default_account_id: Uuid,
    pub default_account_email: String,
    /// Directory holding rendered invoice artifacts
    pub invoices_path: PathBuf,
    /// Mail transport credential, empty disables outbound mail
    pub resend_api_key: String,
    pub mail_from: String,
    /// Base URL used to build login links in reminder emails
    pub app_base_url: String,
    /// Reclamation staleness window, in days
    pub stale_account_days: i64,
    pub completion_schedule: String,
    pub reclamation_schedule: String,
    pub reminder_schedule: String,
    pub token_purge_schedule: String,
    pub invariant_schedule: String,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let database_max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw.parse::<u32>().map_err(|e| ConfigError::Invalid {
                key: "DATABASE_MAX_CONNECTIONS",
                message: e.to_string(),
            })?,
            None => 5,
        };

        let default_account_id = get("DEFAULT_ACCOUNT_ID")
            .ok_or(ConfigError::Missing("DEFAULT_ACCOUNT_ID"))?
            .parse::<Uuid>()
            .map_err(|e| ConfigError::Invalid {
                key: "DEFAULT_ACCOUNT_ID",
                message: e.to_string(),
            })?;

        let stale_account_days = match get("STALE_ACCOUNT_DAYS") {
            Some(raw) => {
                let days = raw.parse::<i64>().map_err(|e| ConfigError::Invalid {
                    key: "STALE_ACCOUNT_DAYS",
                    message: e.to_string(),
                })?;
                if days < 1 {
                    return Err(ConfigError::Invalid {
                        key: "STALE_ACCOUNT_DAYS",
                        message: "must be at least 1".to_string(),
                    });
                }
                days
            }
            None => 2,
        };

        Ok(Self {
            database_url,
            database_max_connections,
            default_account_id,
            default_account_email: get("DEFAULT_ACCOUNT_EMAIL")
                .unwrap_or_else(|| "support@commonpot.localhost".to_string()),
            invoices_path: get("INVOICES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/invoices")),
            resend_api_key: get("RESEND_API_KEY").unwrap_or_default(),
            mail_from: get("MAIL_FROM").unwrap_or_else(|| "billing@localhost".to_string()),
            app_base_url: get("APP_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
            stale_account_days,
            completion_schedule: get("COMPLETION_SCHEDULE")
                .unwrap_or_else(|| "*/10 * * * * *".to_string()),
            reclamation_schedule: get("RECLAMATION_SCHEDULE")
                .unwrap_or_else(|| "0 0 2 * * *".to_string()),
            reminder_schedule: get("REMINDER_SCHEDULE")
                .unwrap_or_else(|| "0 0 9 * * *".to_string()),
            token_purge_schedule: get("TOKEN_PURGE_SCHEDULE")
                .unwrap_or_else(|| "0 30 3 * * *".to_string()),
            invariant_schedule: get("INVARIANT_SCHEDULE")
                .unwrap_or_else(|| "0 0 5 * * *".to_string()),
        })
    }

    pub fn mail_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}
