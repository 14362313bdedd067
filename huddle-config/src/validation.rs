use std::time::Duration;

use huddle_core::jobs::CronExpr;
use thiserror::Error;
use url::Url;

use crate::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("heartbeat cron `{expression}` is invalid: {reason}")]
    InvalidHeartbeatCron { expression: String, reason: String },
    #[error("{field} is not a valid {expected} URL: {url}")]
    InvalidUrl {
        field: &'static str,
        expected: &'static str,
        url: String,
    },
    #[error("bus subscriber buffer must be at least 1")]
    EmptySubscriberBuffer,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    ensure_positive(config.watchdog.timeout, "watchdog timeout")?;
    ensure_positive(config.presence.ttl, "presence ttl")?;
    ensure_positive(config.presence.sweep_interval, "presence sweep interval")?;
    if config.bus.subscriber_buffer == 0 {
        return Err(ConfigGuardRailError::EmptySubscriberBuffer);
    }

    CronExpr::parse(&config.watchdog.heartbeat_cron).map_err(|err| {
        ConfigGuardRailError::InvalidHeartbeatCron {
            expression: config.watchdog.heartbeat_cron.clone(),
            reason: err.to_string(),
        }
    })?;

    if let Some(url) = &config.database.url {
        ensure_scheme(url, "DATABASE_URL", "postgres", &["postgres", "postgresql"])?;
    } else {
        warnings.push_with_hint(
            "DATABASE_URL not configured; presence and schedules use in-memory stores",
            "Set DATABASE_URL when running more than one process",
        );
    }

    match &config.redis {
        Some(redis) => ensure_scheme(&redis.url, "REDIS_URL", "redis", &["redis", "rediss"])?,
        None => warnings.push_with_hint(
            "REDIS_URL not configured; the event bus only reaches this process",
            "Set REDIS_URL to fan events out across processes",
        ),
    }

    if config.presence.sweep_interval > config.presence.ttl {
        warnings.push(format!(
            "presence sweep interval ({}) exceeds ttl ({}); departures will be late",
            humantime::format_duration(config.presence.sweep_interval),
            humantime::format_duration(config.presence.ttl),
        ));
    }

    if !config.jobs.run_jobs {
        warnings.push(
            "HUDDLE_RUN_JOBS is off; this process fires no schedules, including the heartbeat",
        );
    }

    Ok(warnings)
}

fn ensure_positive(value: Duration, field: &'static str) -> Result<(), ConfigGuardRailError> {
    if value.is_zero() {
        return Err(ConfigGuardRailError::ZeroDuration { field });
    }
    Ok(())
}

fn ensure_scheme(
    raw: &str,
    field: &'static str,
    expected: &'static str,
    schemes: &[&str],
) -> Result<(), ConfigGuardRailError> {
    match Url::parse(raw) {
        Ok(url) if schemes.contains(&url.scheme()) => Ok(()),
        _ => Err(ConfigGuardRailError::InvalidUrl {
            field,
            expected,
            url: raw.to_string(),
        }),
    }
}
