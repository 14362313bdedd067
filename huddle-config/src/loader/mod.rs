pub mod error;

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use huddle_model::Tier;
use once_cell::sync::Lazy;

use crate::models::sources::{EnvConfig, FileConfig};
use crate::models::{
    BusSettings, Config, ConfigMetadata, DEFAULT_ALERT_DESTINATION, DEFAULT_DB_MAX_CONNECTIONS,
    DEFAULT_HEARTBEAT_CRON, DEFAULT_PRESENCE_SWEEP_INTERVAL, DEFAULT_PRESENCE_TTL,
    DEFAULT_SUBSCRIBER_BUFFER, DEFAULT_TIER, DEFAULT_WATCHDOG_TIMEOUT, DatabaseConfig, JobSettings,
    PresenceSettings, RedisConfig, WatchdogSettings,
};
use crate::util::{parse_bool, parse_duration};
use crate::validation::{self, ConfigWarnings};
use error::ConfigLoadError;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> =
    Lazy::new(|| vec![PathBuf::from("huddle.toml"), PathBuf::from("config/huddle.toml")]);

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads `.env`, then composes the process environment over the config
    /// file over defaults.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = self.load_env_file()?;
        let mut load = self.load_from(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Composes `env` over the config file over defaults. Does not touch the
    /// process environment.
    pub fn load_from(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        let (file, config_path) = self.load_file_config(&env)?;
        let mut warnings = ConfigWarnings::default();
        if config_path.is_none() {
            warnings.push_with_hint(
                "No huddle.toml detected; using environment variables and defaults",
                "Pass --config or set HUDDLE_CONFIG to point at a configuration file",
            );
        }

        let config = compose_config(file.unwrap_or_default(), env, config_path)?;
        warnings.extend(validation::apply_guard_rails(&config)?);
        Ok(ConfigLoad { config, warnings })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        match loaded {
            Ok(loaded) => Ok(loaded),
            Err(dotenvy::Error::Io(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        // An explicitly named file must exist; defaults are optional.
        let (path, explicit) = match (&self.options.config_path, &env.config_path) {
            (Some(path), _) | (None, Some(path)) => (path.clone(), true),
            (None, None) => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(path) => (path.clone(), false),
                None => return Ok((None, None)),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok((Some(file), Some(path)))
    }
}

fn compose_config(
    file: FileConfig,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        tier: file_tier,
        database: file_database,
        redis: file_redis,
        watchdog: file_watchdog,
        presence: file_presence,
        bus: file_bus,
        jobs: file_jobs,
    } = file;

    let tier_name = env
        .tier
        .or(file_tier)
        .unwrap_or_else(|| DEFAULT_TIER.to_string());
    let tier = Tier::new(tier_name).map_err(ConfigLoadError::InvalidTier)?;

    let database = DatabaseConfig {
        url: env.database_url.or(file_database.url),
        max_connections: match env.database_max_connections {
            Some(raw) => parse_number("DB_MAX_CONNECTIONS", raw)?,
            None => file_database.max_connections.unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
        },
    };

    let redis = env
        .redis_url
        .map(|url| RedisConfig { url })
        .or_else(|| file_redis.map(|redis| RedisConfig { url: redis.url }));

    let watchdog = WatchdogSettings {
        timeout: duration_setting(
            "HUDDLE_WATCHDOG_TIMEOUT",
            env.watchdog_timeout,
            file_watchdog.timeout,
            DEFAULT_WATCHDOG_TIMEOUT,
        )?,
        alert_destination: env
            .alert_destination
            .or(file_watchdog.alert_destination)
            .unwrap_or_else(|| DEFAULT_ALERT_DESTINATION.to_string()),
        heartbeat_cron: env
            .heartbeat_cron
            .or(file_watchdog.heartbeat_cron)
            .unwrap_or_else(|| DEFAULT_HEARTBEAT_CRON.to_string()),
    };

    let presence = PresenceSettings {
        ttl: duration_setting(
            "HUDDLE_PRESENCE_TTL",
            env.presence_ttl,
            file_presence.ttl,
            DEFAULT_PRESENCE_TTL,
        )?,
        sweep_interval: duration_setting(
            "HUDDLE_PRESENCE_SWEEP_INTERVAL",
            env.presence_sweep_interval,
            file_presence.sweep_interval,
            DEFAULT_PRESENCE_SWEEP_INTERVAL,
        )?,
    };

    let bus = BusSettings {
        subscriber_buffer: match env.subscriber_buffer {
            Some(raw) => parse_number("HUDDLE_BUS_SUBSCRIBER_BUFFER", raw)?,
            None => file_bus.subscriber_buffer.unwrap_or(DEFAULT_SUBSCRIBER_BUFFER),
        },
    };

    let jobs = JobSettings {
        run_jobs: match env.run_jobs {
            Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigLoadError::InvalidValue {
                key: "HUDDLE_RUN_JOBS",
                value: raw.clone(),
                reason: "expected a boolean".into(),
            })?,
            None => file_jobs.run_jobs.unwrap_or(true),
        },
    };

    Ok(Config {
        tier,
        database,
        redis,
        watchdog,
        presence,
        bus,
        jobs,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded: false,
        },
    })
}

/// Env wins over file; both are humantime strings.
fn duration_setting(
    key: &'static str,
    env: Option<String>,
    file: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match env.or(file) {
        Some(raw) => parse_duration(&raw).map_err(|source| ConfigLoadError::InvalidDuration {
            key,
            value: raw,
            source,
        }),
        None => Ok(default),
    }
}

fn parse_number<T>(key: &'static str, raw: String) -> Result<T, ConfigLoadError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|err: T::Err| ConfigLoadError::InvalidValue {
        key,
        reason: err.to_string(),
        value: raw,
    })
}
