//! Process-wide settings read from the environment.

use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use chrono_tz::Tz;
use trigger_engine::SchedulerConfig;

use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::scheduler::cache::DEFAULT_CACHE_CAPACITY;
use crate::{Error, Result};

const DEFAULT_DATABASE_URL: &str = "sqlite:qos-monitor.db?mode=rwc";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: String,
    pub scheduler_workers: usize,
    pub scheduler_timezone: Tz,
    pub client_timeout: Duration,
    /// Zero disables the process-definition cache.
    pub process_cache_capacity: usize,
    /// Zero disables the measurement purge job.
    pub measurement_retention_days: u32,
    pub event_channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            scheduler_workers: SchedulerConfig::default().worker_threads,
            scheduler_timezone: Tz::UTC,
            client_timeout: Duration::from_secs(DEFAULT_CLIENT_TIMEOUT_SECS),
            process_cache_capacity: DEFAULT_CACHE_CAPACITY,
            measurement_retention_days: DEFAULT_RETENTION_DAYS,
            event_channel_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Load from environment variables, after reading a `.env` file if present.
    ///
    /// Supported env vars:
    /// - `DATABASE_URL`
    /// - `LOG_DIR`
    /// - `SCHEDULER_WORKERS`
    /// - `SCHEDULER_TIMEZONE` (IANA name, e.g. "Europe/Berlin")
    /// - `CLIENT_TIMEOUT_SECS`
    /// - `PROCESS_CACHE_CAPACITY`
    /// - `MEASUREMENT_RETENTION_DAYS`
    /// - `EVENT_CHANNEL_CAPACITY`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Unset or blank variables keep
    /// their defaults; malformed ones are a configuration error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(url) = var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = var("LOG_DIR") {
            config.log_dir = dir;
        }
        if let Some(raw) = var("SCHEDULER_WORKERS") {
            config.scheduler_workers = parse("SCHEDULER_WORKERS", &raw)?;
            if config.scheduler_workers == 0 {
                return Err(Error::config("SCHEDULER_WORKERS must be at least 1"));
            }
        }
        if let Some(raw) = var("SCHEDULER_TIMEZONE") {
            config.scheduler_timezone = raw
                .parse::<Tz>()
                .map_err(|e| Error::config(format!("SCHEDULER_TIMEZONE: {e}")))?;
        }
        if let Some(raw) = var("CLIENT_TIMEOUT_SECS") {
            let secs: u64 = parse("CLIENT_TIMEOUT_SECS", &raw)?;
            if secs == 0 {
                return Err(Error::config("CLIENT_TIMEOUT_SECS must be at least 1"));
            }
            config.client_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = var("PROCESS_CACHE_CAPACITY") {
            config.process_cache_capacity = parse("PROCESS_CACHE_CAPACITY", &raw)?;
        }
        if let Some(raw) = var("MEASUREMENT_RETENTION_DAYS") {
            config.measurement_retention_days = parse("MEASUREMENT_RETENTION_DAYS", &raw)?;
        }
        if let Some(raw) = var("EVENT_CHANNEL_CAPACITY") {
            config.event_channel_capacity = parse("EVENT_CHANNEL_CAPACITY", &raw)?;
            if config.event_channel_capacity == 0 {
                return Err(Error::config("EVENT_CHANNEL_CAPACITY must be at least 1"));
            }
        }

        Ok(config)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            worker_threads: self.scheduler_workers,
            time_zone: self.scheduler_timezone,
            ..SchedulerConfig::default()
        }
    }

    /// Retention window of the purge job, `None` when purging is off.
    pub fn measurement_retention(&self) -> Option<TimeDelta> {
        (self.measurement_retention_days > 0)
            .then(|| TimeDelta::days(i64::from(self.measurement_retention_days)))
    }
}

fn parse<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| Error::config(format!("{name}={raw:?}: {e}")))
}
