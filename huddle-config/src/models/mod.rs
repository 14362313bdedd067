pub mod sources;

use std::path::PathBuf;
use std::time::Duration;

use huddle_model::Tier;

pub const DEFAULT_TIER: &str = "dev";
pub const DEFAULT_ALERT_DESTINATION: &str = "log";
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_HEARTBEAT_CRON: &str = "* * * * *";
pub const DEFAULT_PRESENCE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_PRESENCE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1024;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment tier whose job schedules this process installs.
    pub tier: Tier,
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub watchdog: WatchdogSettings,
    pub presence: PresenceSettings,
    pub bus: BusSettings,
    pub jobs: JobSettings,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Without a URL the process runs on in-memory stores.
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub timeout: Duration,
    /// Channel, pager name, or an `http(s)://` webhook.
    pub alert_destination: String,
    /// When the heartbeat job fires.
    pub heartbeat_cron: String,
}

#[derive(Debug, Clone)]
pub struct PresenceSettings {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct BusSettings {
    pub subscriber_buffer: usize,
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Disabled on processes that should only serve requests.
    pub run_jobs: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
