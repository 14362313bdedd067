use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use huddle_config::{ConfigLoadError, ConfigLoader, EnvConfig};
use tempfile::NamedTempFile;

fn env(vars: &[(&str, &str)]) -> EnvConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    EnvConfig::from_lookup(|key| vars.get(key).cloned())
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_apply_without_file_or_env() {
    let missing = tempfile::tempdir().unwrap();
    let load = ConfigLoader::new()
        .with_config_path(missing.path().join("absent.toml"))
        .load_from(EnvConfig::default());
    assert!(matches!(load, Err(ConfigLoadError::MissingConfig { .. })));

    let file = config_file("");
    let load = ConfigLoader::new()
        .with_config_path(file.path())
        .load_from(EnvConfig::default())
        .unwrap();
    let config = load.config;
    assert_eq!(config.tier.as_str(), "dev");
    assert_eq!(config.watchdog.timeout, Duration::from_secs(300));
    assert_eq!(config.presence.ttl, Duration::from_secs(30));
    assert!(config.jobs.run_jobs);
    assert!(config.database.url.is_none());
    assert!(config.redis.is_none());
    // In-memory stores and in-process bus are both flagged.
    assert!(load.warnings.items.len() >= 2);
}

#[test]
fn env_overrides_file() {
    let file = config_file(
        r##"
tier = "staging"

[watchdog]
timeout = "2m"
alert_destination = "#ops-file"

[presence]
ttl = "45s"

[redis]
url = "redis://file-host:6379"
"##,
    );

    let load = ConfigLoader::new()
        .with_config_path(file.path())
        .load_from(env(&[
            ("HUDDLE_TIER", "prod"),
            ("HUDDLE_ALERT_DESTINATION", "https://hooks.example.com/huddle"),
            ("DATABASE_URL", "postgres://huddle@localhost/huddle"),
        ]))
        .unwrap();
    let config = load.config;

    assert_eq!(config.tier.as_str(), "prod");
    assert_eq!(config.watchdog.alert_destination, "https://hooks.example.com/huddle");
    assert_eq!(config.watchdog.timeout, Duration::from_secs(120));
    assert_eq!(config.presence.ttl, Duration::from_secs(45));
    assert_eq!(config.redis.unwrap().url, "redis://file-host:6379");
    assert_eq!(config.metadata.config_path.as_deref(), Some(file.path()));
    assert!(load.warnings.is_empty());
}

#[test]
fn invalid_durations_are_rejected() {
    let file = config_file("");
    let err = ConfigLoader::new()
        .with_config_path(file.path())
        .load_from(env(&[("HUDDLE_WATCHDOG_TIMEOUT", "five minutes")]))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::InvalidDuration { key: "HUDDLE_WATCHDOG_TIMEOUT", .. }
    ));

    let err = ConfigLoader::new()
        .with_config_path(file.path())
        .load_from(env(&[("HUDDLE_PRESENCE_TTL", "0s")]))
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::GuardRail(_)));
}

#[test]
fn malformed_values_are_rejected() {
    let file = config_file("");
    let loader = ConfigLoader::new().with_config_path(file.path());

    assert!(matches!(
        loader.load_from(env(&[("HUDDLE_RUN_JOBS", "sometimes")])),
        Err(ConfigLoadError::InvalidValue { key: "HUDDLE_RUN_JOBS", .. })
    ));
    assert!(matches!(
        loader.load_from(env(&[("HUDDLE_HEARTBEAT_CRON", "every minute")])),
        Err(ConfigLoadError::GuardRail(_))
    ));
    assert!(matches!(
        loader.load_from(env(&[("HUDDLE_TIER", "prod east")])),
        Err(ConfigLoadError::InvalidTier(_))
    ));
    assert!(matches!(
        loader.load_from(env(&[("REDIS_URL", "localhost:6379")])),
        Err(ConfigLoadError::GuardRail(_))
    ));
}

#[test]
fn unknown_file_keys_fail_to_parse() {
    let file = config_file("tire = \"prod\"\n");
    let err = ConfigLoader::new()
        .with_config_path(file.path())
        .load_from(EnvConfig::default())
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
}

#[test]
fn config_path_can_come_from_env() {
    let file = config_file("[jobs]\nrun_jobs = false\n");
    let path = file.path().to_string_lossy().into_owned();
    let load = ConfigLoader::new()
        .load_from(env(&[("HUDDLE_CONFIG", &path)]))
        .unwrap();
    assert!(!load.config.jobs.run_jobs);
    assert!(load.warnings.iter().any(|w| w.message.contains("HUDDLE_RUN_JOBS")));
}
