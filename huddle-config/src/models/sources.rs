use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::util::non_empty;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    pub redis: Option<FileRedisConfig>,
    #[serde(default)]
    pub watchdog: FileWatchdogConfig,
    #[serde(default)]
    pub presence: FilePresenceConfig,
    #[serde(default)]
    pub bus: FileBusConfig,
    #[serde(default)]
    pub jobs: FileJobsConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileWatchdogConfig {
    /// Humantime string, e.g. `"5m"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_cron: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePresenceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBusConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_buffer: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileJobsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_jobs: Option<bool>,
}

/// Environment-derived configuration values, kept raw so the loader can
/// report malformed ones.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub database_max_connections: Option<String>,
    pub redis_url: Option<String>,
    pub tier: Option<String>,
    pub alert_destination: Option<String>,
    pub watchdog_timeout: Option<String>,
    pub heartbeat_cron: Option<String>,
    pub presence_ttl: Option<String>,
    pub presence_sweep_interval: Option<String>,
    pub subscriber_buffer: Option<String>,
    pub run_jobs: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| non_empty(lookup(key));
        Self {
            config_path: var("HUDDLE_CONFIG").map(PathBuf::from),
            database_url: var("DATABASE_URL"),
            database_max_connections: var("DB_MAX_CONNECTIONS"),
            redis_url: var("REDIS_URL"),
            tier: var("HUDDLE_TIER"),
            alert_destination: var("HUDDLE_ALERT_DESTINATION"),
            watchdog_timeout: var("HUDDLE_WATCHDOG_TIMEOUT"),
            heartbeat_cron: var("HUDDLE_HEARTBEAT_CRON"),
            presence_ttl: var("HUDDLE_PRESENCE_TTL"),
            presence_sweep_interval: var("HUDDLE_PRESENCE_SWEEP_INTERVAL"),
            subscriber_buffer: var("HUDDLE_BUS_SUBSCRIBER_BUFFER"),
            run_jobs: var("HUDDLE_RUN_JOBS"),
        }
    }
}
