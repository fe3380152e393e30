// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the operations runtime.

use std::sync::Arc;
use std::time::Duration;

use provisioner_core::Session;
use provisioner_core::persistence::{PostgresSession, SqliteSession};
use tracing::{info, warn};

use crate::executor::ExecutorConfig;
use crate::retry::RetryPolicy;
use crate::timeouts::StageTimeouts;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `postgres://` or `sqlite:` URL of the operations database
    pub database_url: String,
    /// Workers per operation type
    pub workers: usize,
    /// Requeue delay after recoverable stage errors
    pub default_delay: Duration,
    /// Attempts for persisted writes and failure side effects
    pub retry_attempts: u32,
    /// Stage time budgets
    pub timeouts: StageTimeouts,
}

impl Config {
    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("No .env file loaded: {}", e);
        }
        Self::from_env()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("PROVISIONER_DATABASE_URL")
            .ok_or(ConfigError::MissingEnvVar("PROVISIONER_DATABASE_URL"))?;

        let workers = parse_or(&lookup, "PROVISIONER_WORKERS", 5usize)?;
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                var: "PROVISIONER_WORKERS",
                value: "0".to_string(),
            });
        }

        let default_delay = Duration::from_secs(parse_or(
            &lookup,
            "PROVISIONER_DEFAULT_DELAY_SECS",
            20u64,
        )?);
        let retry_attempts = parse_or(&lookup, "PROVISIONER_RETRY_ATTEMPTS", 5u32)?;
        let timeouts = StageTimeouts::from_lookup(&lookup)?;

        Ok(Self {
            database_url,
            workers,
            default_delay,
            retry_attempts,
            timeouts,
        })
    }

    /// Retry policy for persisted writes.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.retry_attempts)
    }

    /// Executor settings derived from this configuration.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            default_delay: self.default_delay,
            retry: self.retry_policy(),
        }
    }

    /// Open the session backend matching `database_url`.
    pub async fn connect_session(&self) -> crate::error::Result<Arc<dyn Session>> {
        let url = self.database_url.as_str();
        if url.starts_with("sqlite:") {
            info!("Using SQLite session");
            let session = SqliteSession::connect(url).await?;
            Ok(Arc::new(session))
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            info!("Using PostgreSQL session");
            let max_connections = u32::try_from(self.workers * 2).unwrap_or(u32::MAX);
            let session = PostgresSession::connect(url, max_connections).await?;
            Ok(Arc::new(session))
        } else {
            Err(ConfigError::UnsupportedDatabaseUrl.into())
        }
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable could not be parsed.
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Rejected value.
        value: String,
    },
    /// The database URL names neither PostgreSQL nor SQLite.
    #[error("Unsupported database URL, expected postgres:// or sqlite:")]
    UnsupportedDatabaseUrl,
}
