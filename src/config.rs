use serde::Deserialize;
use std::time::Duration;

use crate::throttle::ThrottlePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
    pub max_attempts: u32,
    pub window_secs: u64,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl ThrottleConfig {
    pub fn policy(&self) -> ThrottlePolicy {
        ThrottlePolicy {
            max_attempts: self.max_attempts,
            window: Duration::from_secs(self.window_secs),
            base_backoff: Duration::from_secs(self.base_backoff_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Lifetime of email-confirmation tokens.
    pub confirm_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Upper bound on a requested remember-me duration.
    pub max_remember_days: i64,
    /// Interval of the background sweep (throttle counters, expired tokens).
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Public base URL used to build verification links.
    pub base_url: String,
    pub require_email_verification: bool,
    pub throttle: ThrottleConfig,
    pub tokens: TokenConfig,
    pub sessions: SessionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            base_url: "http://localhost:8080".into(),
            require_email_verification: true,
            throttle: ThrottleConfig {
                max_attempts: 10,
                window_secs: 60,
                base_backoff_secs: 30,
                max_backoff_secs: 3600,
            },
            tokens: TokenConfig {
                confirm_ttl_hours: 24,
            },
            sessions: SessionConfig {
                max_remember_days: 30,
                sweep_interval_secs: 300,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = AppConfig::default();
        let database_url = std::env::var("DATABASE_URL")?;
        Ok(Self {
            database_url,
            base_url: std::env::var("BASE_URL").unwrap_or(defaults.base_url),
            require_email_verification: env_parse(
                "REQUIRE_EMAIL_VERIFICATION",
                defaults.require_email_verification,
            ),
            throttle: ThrottleConfig {
                max_attempts: env_parse("THROTTLE_MAX_ATTEMPTS", defaults.throttle.max_attempts),
                window_secs: env_parse("THROTTLE_WINDOW_SECS", defaults.throttle.window_secs),
                base_backoff_secs: env_parse(
                    "THROTTLE_BASE_BACKOFF_SECS",
                    defaults.throttle.base_backoff_secs,
                ),
                max_backoff_secs: env_parse(
                    "THROTTLE_MAX_BACKOFF_SECS",
                    defaults.throttle.max_backoff_secs,
                ),
            },
            tokens: TokenConfig {
                confirm_ttl_hours: env_parse(
                    "CONFIRM_TOKEN_TTL_HOURS",
                    defaults.tokens.confirm_ttl_hours,
                ),
            },
            sessions: SessionConfig {
                max_remember_days: env_parse(
                    "MAX_REMEMBER_DAYS",
                    defaults.sessions.max_remember_days,
                ),
                sweep_interval_secs: env_parse(
                    "SWEEP_INTERVAL_SECS",
                    defaults.sessions.sweep_interval_secs,
                ),
            },
        })
    }
}
