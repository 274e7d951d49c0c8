//! Runtime configuration
//!
//! [`Config`] gathers the tunables of a [`SessionStore`](crate::store::SessionStore).
//! It deserializes with defaults for every field, and can be read from
//! `LIVEQUIZ_*` environment variables (a `.env` file is honored).

use std::{str::FromStr, time::Duration};

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{game::Options, persistence::RetryPolicy, quiz::validate_duration};

/// Failure to build a [`Config`]
#[derive(Error, Debug)]
pub enum Error {
    /// A variable was set but could not be parsed
    #[error("invalid value {value:?} for {key}")]
    Parse {
        /// Name of the variable
        key: &'static str,
        /// Its raw value
        value: String,
    },
    /// The values parsed but are out of bounds
    #[error("invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_finished_retention() -> Duration {
    Duration::from_secs(60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

/// Tunables of the session store
#[serde_with::serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Options applied to every new session
    #[garde(dive)]
    #[serde(flatten)]
    pub game: Options,
    /// How long a session with no live connection survives
    #[garde(custom(validate_duration::<60, 86_400>))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: Duration,
    /// How long a finished session stays available for rejoins
    #[garde(custom(validate_duration::<0, 3_600>))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_finished_retention")]
    pub finished_retention: Duration,
    /// How often the sweeper looks for sessions to remove
    #[garde(custom(validate_duration::<1, 3_600>))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: Duration,
    /// Retries of failed persistence writes
    #[garde(dive)]
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            game: Options::default(),
            idle_timeout: default_idle_timeout(),
            finished_retention: default_finished_retention(),
            sweep_interval: default_sweep_interval(),
            retry: RetryPolicy::default(),
        }
    }
}

fn parse<T: FromStr, L: Fn(&str) -> Option<String>>(
    lookup: &L,
    key: &'static str,
) -> Result<Option<T>, Error> {
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| Error::Parse { key, value })
        })
        .transpose()
}

impl Config {
    /// Reads the configuration from the process environment
    ///
    /// Loads `.env` first if present. Unset variables keep their defaults:
    ///
    /// | variable | unit |
    /// |---|---|
    /// | `LIVEQUIZ_QUESTION_DELAY_MS` | milliseconds |
    /// | `LIVEQUIZ_LEADERBOARD_SIZE` | rows |
    /// | `LIVEQUIZ_IDLE_TIMEOUT_SECS` | seconds |
    /// | `LIVEQUIZ_FINISHED_RETENTION_SECS` | seconds |
    /// | `LIVEQUIZ_SWEEP_INTERVAL_SECS` | seconds |
    /// | `LIVEQUIZ_RETRY_ATTEMPTS` | attempts |
    /// | `LIVEQUIZ_RETRY_BACKOFF_MS` | milliseconds |
    ///
    /// # Errors
    ///
    /// Returns an error if a variable does not parse or a value is out of
    /// bounds.
    pub fn from_env() -> Result<Self, Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup<L: Fn(&str) -> Option<String>>(lookup: L) -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(ms) = parse(&lookup, "LIVEQUIZ_QUESTION_DELAY_MS")? {
            config.game.question_delay = Duration::from_millis(ms);
        }
        if let Some(size) = parse(&lookup, "LIVEQUIZ_LEADERBOARD_SIZE")? {
            config.game.leaderboard_size = size;
        }
        if let Some(secs) = parse(&lookup, "LIVEQUIZ_IDLE_TIMEOUT_SECS")? {
            config.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "LIVEQUIZ_FINISHED_RETENTION_SECS")? {
            config.finished_retention = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "LIVEQUIZ_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse(&lookup, "LIVEQUIZ_RETRY_ATTEMPTS")? {
            config.retry.attempts = attempts;
        }
        if let Some(ms) = parse(&lookup, "LIVEQUIZ_RETRY_BACKOFF_MS")? {
            config.retry.backoff = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}
