//! Configuration for Huddle processes.
//!
//! Values come from, in order of precedence: environment variables (after a
//! `.env` file is loaded), a `huddle.toml` file, then built-in defaults.
//! [`ConfigLoader`] composes them into a validated [`Config`] plus any
//! non-fatal [`ConfigWarnings`].

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::sources::{EnvConfig, FileConfig};
pub use models::{
    BusSettings, Config, ConfigMetadata, DatabaseConfig, JobSettings, PresenceSettings, RedisConfig,
    WatchdogSettings,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
